//! Retriever - similarity search plus citation-aligned context assembly
//!
//! Hit order is the index's rank order (ascending distance) and is never
//! re-sorted here. The `[Source N]` markers in the context, the citation list
//! and the hit list all share that order.

use crate::errors::{AppError, Result};
use crate::index::{CorpusIndex, IndexFilter};
use crate::models::RetrievalHit;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Separator line between source fragments
pub const SOURCE_SEPARATOR: &str = "\n---\n";

/// Retrieved hits, their citations and the assembled context string
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub hits: Vec<RetrievalHit>,
    pub citations: Vec<String>,
    pub context: String,
}

impl ContextBundle {
    /// Assemble hits in the given order
    ///
    /// With a character budget, trailing hits that would overflow it are
    /// dropped whole; the first hit is always kept.
    pub fn assemble(hits: Vec<RetrievalHit>, max_chars: Option<usize>) -> Self {
        let mut kept = Vec::with_capacity(hits.len());
        let mut citations = Vec::with_capacity(hits.len());
        let mut context = String::new();
        let mut context_chars = 0usize;

        for (i, hit) in hits.into_iter().enumerate() {
            let rank = i + 1;
            let citation = hit
                .chunk
                .citation()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Source {}", rank));
            let fragment = format!("[Source {}: {}]\n{}\n", rank, citation, hit.chunk.text());

            let separator = if rank > 1 { SOURCE_SEPARATOR } else { "" };
            let added = separator.chars().count() + fragment.chars().count();
            if let Some(limit) = max_chars {
                if rank > 1 && context_chars + added > limit {
                    debug!(kept = kept.len(), limit, "Context budget reached");
                    break;
                }
            }

            context.push_str(separator);
            context.push_str(&fragment);
            context_chars += added;
            citations.push(citation);
            kept.push(hit);
        }

        Self {
            hits: kept,
            citations,
            context,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Issues similarity queries and builds context bundles
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn CorpusIndex>,
    max_context_chars: Option<usize>,
}

impl Retriever {
    pub fn new(index: Arc<dyn CorpusIndex>) -> Self {
        Self {
            index,
            max_context_chars: None,
        }
    }

    /// Bound the assembled context string
    pub fn with_context_budget(mut self, max_chars: Option<usize>) -> Self {
        self.max_context_chars = max_chars;
        self
    }

    pub fn index(&self) -> &Arc<dyn CorpusIndex> {
        &self.index
    }

    /// The cached flag may predate chunks written by another process, so a
    /// negative answer is confirmed against the live count.
    async fn ensure_ready(&self) -> Result<()> {
        if self.index.is_initialized() || self.index.stats().await?.count > 0 {
            Ok(())
        } else {
            Err(AppError::NotInitialized {
                message: format!(
                    "collection '{}' has no documents",
                    self.index.collection_name()
                ),
            })
        }
    }

    /// Top `k` hits, restricted to `sources` when non-empty
    #[instrument(skip(self, query, sources), fields(source_count = sources.len()))]
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        sources: &[String],
    ) -> Result<Vec<RetrievalHit>> {
        self.ensure_ready().await?;

        let filter = IndexFilter::from_sources(sources);
        let hits = self.index.search(query, k, filter.as_ref()).await?;

        debug!(hits = hits.len(), "Retrieved");
        Ok(hits)
    }

    /// Like `retrieve`, dropping hits farther than `max_distance`
    pub async fn retrieve_within(
        &self,
        query: &str,
        k: usize,
        sources: &[String],
        max_distance: f32,
    ) -> Result<Vec<RetrievalHit>> {
        let mut hits = self.retrieve(query, k, sources).await?;
        hits.retain(|hit| hit.distance <= max_distance);
        Ok(hits)
    }

    /// Retrieve and assemble a context bundle
    pub async fn retrieve_context(
        &self,
        query: &str,
        k: usize,
        sources: &[String],
    ) -> Result<ContextBundle> {
        let hits = self.retrieve(query, k, sources).await?;
        Ok(ContextBundle::assemble(hits, self.max_context_chars))
    }

    /// Relevance-gated variant of `retrieve_context`
    pub async fn retrieve_context_within(
        &self,
        query: &str,
        k: usize,
        sources: &[String],
        max_distance: f32,
    ) -> Result<ContextBundle> {
        let hits = self.retrieve_within(query, k, sources, max_distance).await?;
        Ok(ContextBundle::assemble(hits, self.max_context_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::MemoryIndex;
    use crate::models::{Chunk, ChunkMetadata};

    fn metadata(book: &str, index: usize, page: Option<u32>) -> ChunkMetadata {
        ChunkMetadata {
            source_document_id: format!("data/{}.txt", book),
            book_name: book.to_string(),
            chunk_index: index,
            total_chunks: 4,
            page_number: page,
            chapter: None,
            entity_name: None,
        }
    }

    async fn populated() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new(Arc::new(HashingEmbedder::new(128)), "test"));
        index
            .upsert(&[
                Chunk::new("ACONITUM. Sudden fear of death.", metadata("Kent", 0, Some(12))),
                Chunk::new("ARSENICUM. Fear of death at night.", metadata("Boericke", 0, Some(80))),
                Chunk::new("ARNICA. Bruised soreness.", metadata("Boericke", 1, None)),
                Chunk::restore("GELSEMIUM. Fear of ordeals.", metadata("Clarke", 0, None), None),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_citations_align_with_hits() {
        let retriever = Retriever::new(populated().await);
        let bundle = retriever.retrieve_context("fear of death", 4, &[]).await.unwrap();

        assert_eq!(bundle.len(), 4);
        assert_eq!(bundle.citations.len(), bundle.hits.len());
        for (i, (hit, citation)) in bundle.hits.iter().zip(&bundle.citations).enumerate() {
            let expected = hit
                .chunk
                .citation()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Source {}", i + 1));
            assert_eq!(citation, &expected);
            let marker = format!("[Source {}: {}]\n{}\n", i + 1, citation, hit.chunk.text());
            assert!(bundle.context.contains(&marker));
        }
        assert_eq!(bundle.context.matches(SOURCE_SEPARATOR).count(), 3);
        assert!(bundle.citations.iter().any(|c| c.starts_with("Source ")));
    }

    #[tokio::test]
    async fn test_rank_order_preserved() {
        let retriever = Retriever::new(populated().await);
        let hits = retriever.retrieve("fear of death", 4, &[]).await.unwrap();
        let bundle = ContextBundle::assemble(hits.clone(), None);
        let ids: Vec<String> = bundle.hits.iter().map(|h| h.chunk.id()).collect();
        let expected: Vec<String> = hits.iter().map(|h| h.chunk.id()).collect();
        assert_eq!(ids, expected);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_source_filter() {
        let retriever = Retriever::new(populated().await);
        let bundle = retriever
            .retrieve_context("fear", 5, &["Boericke".to_string()])
            .await
            .unwrap();
        assert_eq!(bundle.len(), 2);
        assert!(bundle.hits.iter().all(|h| h.chunk.book_name() == "Boericke"));
    }

    #[tokio::test]
    async fn test_empty_result_is_not_error() {
        let retriever = Retriever::new(populated().await);
        let bundle = retriever
            .retrieve_context("fear", 5, &["Unknown Book".to_string()])
            .await
            .unwrap();
        assert!(bundle.is_empty());
        assert!(bundle.context.is_empty());
        assert!(bundle.citations.is_empty());
    }

    #[tokio::test]
    async fn test_distance_threshold() {
        let retriever = Retriever::new(populated().await);
        let all = retriever.retrieve("fear of death", 4, &[]).await.unwrap();
        let cutoff = all[1].distance;

        let gated = retriever
            .retrieve_context_within("fear of death", 4, &[], cutoff)
            .await
            .unwrap();
        assert!(gated.len() >= 2);
        assert!(gated.hits.iter().all(|h| h.distance <= cutoff));

        let none = retriever
            .retrieve_context_within("fear of death", 4, &[], -1.0)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let index = Arc::new(MemoryIndex::new(Arc::new(HashingEmbedder::new(32)), "empty"));
        let retriever = Retriever::new(index);
        let err = retriever.retrieve_context("fear", 3, &[]).await.unwrap_err();
        assert!(matches!(err, AppError::NotInitialized { .. }));
    }

    /// Index whose readiness flag never refreshes, like a backend that was
    /// filled by a separate ingest run
    struct StaleFlagIndex(MemoryIndex);

    #[async_trait::async_trait]
    impl CorpusIndex for StaleFlagIndex {
        async fn search(
            &self,
            query: &str,
            k: usize,
            filter: Option<&IndexFilter>,
        ) -> Result<Vec<RetrievalHit>> {
            self.0.search(query, k, filter).await
        }

        async fn upsert(&self, chunks: &[Chunk]) -> Result<usize> {
            self.0.upsert(chunks).await
        }

        async fn replace_document(&self, source_document_id: &str, chunks: &[Chunk]) -> Result<usize> {
            self.0.replace_document(source_document_id, chunks).await
        }

        async fn stats(&self) -> Result<crate::index::IndexStats> {
            self.0.stats().await
        }

        async fn list_sources(&self) -> Result<Vec<String>> {
            self.0.list_sources().await
        }

        async fn reset(&self) -> Result<()> {
            self.0.reset().await
        }

        fn is_initialized(&self) -> bool {
            false
        }

        fn collection_name(&self) -> &str {
            self.0.collection_name()
        }
    }

    #[tokio::test]
    async fn test_ready_once_filled_elsewhere() {
        let index = Arc::new(StaleFlagIndex(MemoryIndex::new(
            Arc::new(HashingEmbedder::new(64)),
            "shared",
        )));
        let retriever = Retriever::new(index.clone());

        let err = retriever.retrieve("fear", 3, &[]).await.unwrap_err();
        assert!(matches!(err, AppError::NotInitialized { .. }));

        index
            .upsert(&[Chunk::new("ACONITUM. Sudden fear.", metadata("Kent", 0, None))])
            .await
            .unwrap();
        let hits = retriever.retrieve("fear", 3, &[]).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_drops_whole_trailing_hits() {
        let retriever = Retriever::new(populated().await).with_context_budget(Some(60));
        let bundle = retriever.retrieve_context("fear of death", 4, &[]).await.unwrap();

        // The first fragment is always kept
        assert!(!bundle.is_empty());
        assert!(bundle.len() < 4);
        assert_eq!(bundle.citations.len(), bundle.len());
        assert!(bundle.context.starts_with("[Source 1: "));

        let tiny = Retriever::new(populated().await).with_context_budget(Some(1));
        let bundle = tiny.retrieve_context("fear of death", 4, &[]).await.unwrap();
        assert_eq!(bundle.len(), 1);
    }
}
