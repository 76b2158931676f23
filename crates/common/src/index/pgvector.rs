//! PostgreSQL + pgvector corpus index

use super::{CorpusIndex, IndexFilter, IndexStats};
use crate::config::IndexConfig;
use crate::db::{ChunkRepository, DbPool};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::models::{Chunk, RetrievalHit};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct PgVectorIndex {
    repository: ChunkRepository,
    embedder: Arc<dyn Embedder>,
    /// Cached "collection is non-empty", refreshed by every call that learns the count
    initialized: AtomicBool,
}

impl PgVectorIndex {
    /// Connect, create the schema if needed and load the collection state
    pub async fn connect(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = DbPool::new(config).await?;
        let repository = ChunkRepository::new(pool, config.collection_name.clone());
        repository.ensure_schema(embedder.dimension()).await?;

        let count = repository.count().await?;
        info!(
            collection = %config.collection_name,
            count,
            "Connected to pgvector collection"
        );

        Ok(Self {
            repository,
            embedder,
            initialized: AtomicBool::new(count > 0),
        })
    }

    fn upstream(err: AppError) -> AppError {
        match err {
            AppError::Database(e) => AppError::CorpusIndex {
                message: e.to_string(),
            },
            other => other,
        }
    }
}

#[async_trait]
impl CorpusIndex for PgVectorIndex {
    #[instrument(skip(self, query, filter), fields(collection = %self.repository.collection()))]
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&IndexFilter>,
    ) -> Result<Vec<RetrievalHit>> {
        let embedding = self.embedder.embed(query).await?;
        self.repository
            .search(&embedding, k, filter)
            .await
            .map_err(Self::upstream)
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text().to_string()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        let written = self
            .repository
            .upsert(chunks, &embeddings)
            .await
            .map_err(Self::upstream)?;

        if written > 0 {
            self.initialized.store(true, Ordering::Release);
        }
        Ok(written)
    }

    async fn replace_document(&self, source_document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text().to_string()).collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };

        let written = self
            .repository
            .replace_document(source_document_id, chunks, &embeddings)
            .await
            .map_err(Self::upstream)?;

        let count = self.repository.count().await.map_err(Self::upstream)?;
        self.initialized.store(count > 0, Ordering::Release);
        Ok(written)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let count = self.repository.count().await.map_err(Self::upstream)?;
        self.initialized.store(count > 0, Ordering::Release);
        Ok(IndexStats::new(count, self.repository.collection()))
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        self.repository.list_sources().await.map_err(Self::upstream)
    }

    async fn reset(&self) -> Result<()> {
        let removed = self.repository.delete_all().await.map_err(Self::upstream)?;
        self.initialized.store(false, Ordering::Release);
        info!(removed, collection = %self.repository.collection(), "Collection reset");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn collection_name(&self) -> &str {
        self.repository.collection()
    }
}
