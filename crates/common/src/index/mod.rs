//! Corpus index abstraction
//!
//! The index stores chunk embeddings with their metadata and answers
//! similarity queries under an optional source filter. Two backends:
//! - `MemoryIndex`: in-process brute force
//! - `PgVectorIndex`: PostgreSQL with the pgvector extension

mod memory;
mod pgvector;

pub use memory::MemoryIndex;
pub use pgvector::PgVectorIndex;

use crate::config::{IndexBackend, IndexConfig};
use crate::embeddings::Embedder;
use crate::errors::Result;
use crate::models::{Chunk, RetrievalHit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Restriction of a search to some source books
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    BookEquals(String),
    BookIn(Vec<String>),
}

impl IndexFilter {
    /// Equality for one source, membership for several, nothing for none
    pub fn from_sources(sources: &[String]) -> Option<Self> {
        match sources {
            [] => None,
            [only] => Some(IndexFilter::BookEquals(only.clone())),
            many => Some(IndexFilter::BookIn(many.to_vec())),
        }
    }

    pub fn matches(&self, book_name: &str) -> bool {
        match self {
            IndexFilter::BookEquals(book) => book == book_name,
            IndexFilter::BookIn(books) => books.iter().any(|b| b == book_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Ready,
    NotInitialized,
}

/// Collection summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub status: IndexStatus,
    pub count: u64,
    pub collection_name: String,
}

impl IndexStats {
    pub fn new(count: u64, collection_name: impl Into<String>) -> Self {
        Self {
            status: if count > 0 {
                IndexStatus::Ready
            } else {
                IndexStatus::NotInitialized
            },
            count,
            collection_name: collection_name.into(),
        }
    }
}

/// Similarity search over the chunk corpus
#[async_trait]
pub trait CorpusIndex: Send + Sync {
    /// Top `k` chunks for a query text, ascending distance
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalHit>>;

    /// Insert or replace chunks keyed by `{source_document_id}:{chunk_index}`
    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize>;

    /// Swap every chunk of one source document for `chunks` atomically
    async fn replace_document(&self, source_document_id: &str, chunks: &[Chunk]) -> Result<usize>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Distinct source book names, sorted
    async fn list_sources(&self) -> Result<Vec<String>>;

    /// Remove every chunk of the collection
    async fn reset(&self) -> Result<()>;

    /// Whether the collection holds any chunk; must not block
    fn is_initialized(&self) -> bool;

    fn collection_name(&self) -> &str;
}

/// Build the configured index backend
pub async fn create_index(
    config: &IndexConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn CorpusIndex>> {
    let index: Arc<dyn CorpusIndex> = match config.backend {
        IndexBackend::Memory => Arc::new(MemoryIndex::new(embedder, config.collection_name.clone())),
        IndexBackend::Pgvector => Arc::new(PgVectorIndex::connect(config, embedder).await?),
    };

    tracing::info!(
        backend = ?config.backend,
        collection = index.collection_name(),
        initialized = index.is_initialized(),
        "Corpus index ready"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_shape() {
        assert_eq!(IndexFilter::from_sources(&[]), None);

        let one = IndexFilter::from_sources(&["Boericke".to_string()]).unwrap();
        assert_eq!(one, IndexFilter::BookEquals("Boericke".to_string()));
        assert!(one.matches("Boericke"));
        assert!(!one.matches("Kent"));

        let many = IndexFilter::from_sources(&["Boericke".to_string(), "Kent".to_string()]).unwrap();
        assert!(matches!(many, IndexFilter::BookIn(ref b) if b.len() == 2));
        assert!(many.matches("Kent"));
        assert!(!many.matches("Clarke"));
    }

    #[test]
    fn test_stats_status() {
        assert_eq!(IndexStats::new(0, "c").status, IndexStatus::NotInitialized);
        assert_eq!(IndexStats::new(3, "c").status, IndexStatus::Ready);
        assert_eq!(
            serde_json::to_string(&IndexStatus::NotInitialized).unwrap(),
            "\"not_initialized\""
        );
    }
}
