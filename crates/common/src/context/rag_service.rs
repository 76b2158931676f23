//! RAG service - the answer pipeline behind every question
//!
//! Per question: cache lookup, then on a miss retrieval, generation and a
//! cache write. Empty retrievals are answered with a fixed message and are
//! never cached, so a later ingestion can still answer the same question.

use super::retriever::{ContextBundle, Retriever};
use super::synthesizer::{ChatCompletionGenerator, Generator};
use crate::cache::{CacheStats, QueryCache};
use crate::config::{AppConfig, RetrievalConfig};
use crate::embeddings::create_embedder;
use crate::errors::{AppError, Result};
use crate::index::{create_index, CorpusIndex, IndexStatus};
use crate::metrics::{self, QueryOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Answer returned when retrieval finds nothing
pub const NO_RESULTS_ANSWER: &str =
    "No relevant information found in the knowledge base for this query.";

/// One retrieved source as shown to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Book name
    pub source: String,
    pub page: Option<u32>,
    /// Provenance label of the chunk
    pub citation: String,
    /// Chunk text preview
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub sources_used: Vec<String>,
    /// Latency of the run that produced the answer; cache hits keep the original
    pub processing_time_ms: u64,
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseStats {
    pub status: IndexStatus,
    pub document_count: u64,
    pub collection_name: String,
    pub sources: Vec<String>,
}

/// Orchestrates cache, retriever and generator
///
/// Construct once and share; `initialize()` must run before questions are
/// answered and is safe to call more than once.
pub struct RagService {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    cache: QueryCache<QueryResponse>,
    settings: RetrievalConfig,
    started: AtomicBool,
}

impl RagService {
    pub fn new(
        index: Arc<dyn CorpusIndex>,
        generator: Arc<dyn Generator>,
        cache: QueryCache<QueryResponse>,
        settings: RetrievalConfig,
    ) -> Self {
        let retriever = Retriever::new(index).with_context_budget(settings.max_context_chars);
        Self {
            retriever,
            generator,
            cache,
            settings,
            started: AtomicBool::new(false),
        }
    }

    /// Wire the configured embedder, index backend, generator and cache
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = create_index(&config.index, embedder).await?;
        let generator = Arc::new(ChatCompletionGenerator::from_config(&config.generation)?);
        info!(
            provider = ?config.generation.provider,
            model = generator.model_name(),
            "Generator ready"
        );

        Ok(Self::new(
            index,
            generator,
            QueryCache::from_config(&config.cache),
            config.retrieval.clone(),
        ))
    }

    /// Start serving; an empty collection is reported, not fatal
    pub async fn initialize(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("Initializing RAG service...");
        let stats = self.retriever.index().stats().await?;
        if stats.status == IndexStatus::NotInitialized {
            warn!(
                collection = %stats.collection_name,
                "Knowledge base is empty. Run ingestion first."
            );
        } else {
            info!(
                collection = %stats.collection_name,
                count = stats.count,
                "Knowledge base loaded"
            );
        }

        self.started.store(true, Ordering::Release);
        info!("RAG service initialized successfully");
        Ok(())
    }

    /// Stop serving and drop cached answers
    pub fn shutdown(&self) {
        if self.started.swap(false, Ordering::AcqRel) {
            let removed = self.cache.clear();
            info!(removed, "RAG service shut down");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(AppError::Internal {
                message: "RAG service used before initialize()".to_string(),
            })
        }
    }

    /// Trim, reject too-short questions and truncate too-long ones
    pub fn sanitize_question(&self, question: &str) -> Result<String> {
        let trimmed = question.trim();
        let length = trimmed.chars().count();

        if length < self.settings.min_question_chars {
            return Err(AppError::validation(
                "question",
                format!(
                    "Question must be at least {} characters",
                    self.settings.min_question_chars
                ),
            ));
        }

        if length > self.settings.max_question_chars {
            return Ok(trimmed
                .chars()
                .take(self.settings.max_question_chars)
                .collect());
        }

        Ok(trimmed.to_string())
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        let k = top_k.unwrap_or(self.settings.default_top_k);
        if k == 0 || k > self.settings.max_top_k {
            return Err(AppError::validation(
                "top_k",
                format!("top_k must be between 1 and {}", self.settings.max_top_k),
            ));
        }
        Ok(k)
    }

    /// Answer a question, from cache when possible
    #[instrument(skip(self, question, source_filter), fields(top_k))]
    pub async fn answer_question(
        &self,
        question: &str,
        source_filter: Option<&[String]>,
        top_k: Option<usize>,
    ) -> Result<QueryResponse> {
        let start = Instant::now();
        self.ensure_started()?;

        let clean_question = self.sanitize_question(question).inspect_err(|e| {
            warn!(error = %e, "Query validation error");
        })?;
        let k = self.resolve_top_k(top_k)?;
        tracing::Span::current().record("top_k", k);
        let sources = source_filter.unwrap_or(&[]);

        // Keyed by the question as received; normalization happens in the key
        if let Some(mut cached) = self.cache.get(question, sources) {
            cached.question = question.to_string();
            cached.cached = true;
            cached.created_at = Utc::now();
            metrics::record_query(start.elapsed().as_secs_f64(), QueryOutcome::Cached, 0);
            info!(query_id = %cached.id, cached = true, "Query served from cache");
            return Ok(cached);
        }

        let query_id = Uuid::new_v4();
        info!(query_id = %query_id, question = %preview(&clean_question, 50), "Processing query");

        let bundle = self
            .retrieve(&clean_question, k, sources)
            .await
            .inspect_err(|e| error!(query_id = %query_id, error = %e, "Retrieval failed"))?;

        if bundle.is_empty() {
            let processing_time_ms = start.elapsed().as_millis() as u64;
            metrics::record_query(start.elapsed().as_secs_f64(), QueryOutcome::Empty, 0);
            info!(query_id = %query_id, latency_ms = processing_time_ms, hits = 0, "No relevant context found");
            return Ok(QueryResponse {
                id: query_id,
                question: question.to_string(),
                answer: NO_RESULTS_ANSWER.to_string(),
                citations: Vec::new(),
                sources_used: Vec::new(),
                processing_time_ms,
                cached: false,
                created_at: Utc::now(),
            });
        }

        let answer = self
            .generator
            .generate(&clean_question, &bundle.context)
            .await
            .inspect_err(|e| error!(query_id = %query_id, error = %e, "Generation failed"))?;

        let hits = bundle.len();
        let response = QueryResponse {
            id: query_id,
            question: question.to_string(),
            answer,
            citations: self.citations(&bundle),
            sources_used: sources_used(&bundle),
            processing_time_ms: start.elapsed().as_millis() as u64,
            cached: false,
            created_at: Utc::now(),
        };

        self.cache.set(question, sources, response.clone());

        metrics::record_query(start.elapsed().as_secs_f64(), QueryOutcome::Generated, hits);
        info!(
            query_id = %query_id,
            hits,
            latency_ms = response.processing_time_ms,
            cached = false,
            "Query completed"
        );
        Ok(response)
    }

    async fn retrieve(&self, question: &str, k: usize, sources: &[String]) -> Result<ContextBundle> {
        match self.settings.max_distance {
            Some(max_distance) => {
                self.retriever
                    .retrieve_context_within(question, k, sources, max_distance)
                    .await
            }
            None => self.retriever.retrieve_context(question, k, sources).await,
        }
    }

    fn citations(&self, bundle: &ContextBundle) -> Vec<Citation> {
        bundle
            .hits
            .iter()
            .zip(&bundle.citations)
            .map(|(hit, citation)| {
                let meta = hit.chunk.metadata();
                Citation {
                    source: meta.book_name.clone(),
                    page: meta.page_number,
                    citation: citation.clone(),
                    excerpt: excerpt(hit.chunk.text(), self.settings.excerpt_chars),
                }
            })
            .collect()
    }

    /// Distinct source books, sorted
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        self.retriever.index().list_sources().await
    }

    pub async fn knowledge_base_stats(&self) -> Result<KnowledgeBaseStats> {
        let index = self.retriever.index();
        let stats = index.stats().await?;
        let sources = index.list_sources().await?;

        Ok(KnowledgeBaseStats {
            status: stats.status,
            document_count: stats.count,
            collection_name: stats.collection_name,
            sources,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached answer; counters are kept
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.invalidate(None, &[]);
        info!(removed, "Query cache cleared");
        removed
    }

    pub fn index(&self) -> &Arc<dyn CorpusIndex> {
        self.retriever.index()
    }

    /// Whether the corpus index holds any chunk
    pub fn is_ready(&self) -> bool {
        self.retriever.index().is_initialized()
    }
}

/// Book names in first-appearance rank order
fn sources_used(bundle: &ContextBundle) -> Vec<String> {
    let mut seen = Vec::new();
    for hit in &bundle.hits {
        let book = hit.chunk.book_name();
        if !seen.iter().any(|s: &String| s == book) {
            seen.push(book.to_string());
        }
    }
    seen
}

/// Text truncated to `max_chars` characters, with "..." when cut
fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::index::MemoryIndex;
    use crate::models::{Chunk, ChunkMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls and answers with a fixed text
    struct ScriptedGenerator {
        calls: AtomicUsize,
        last_context: Mutex<String>,
        fail: bool,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                last_context: Mutex::new(String::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _question: &str, context: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock().unwrap() = context.to_string();
            if self.fail {
                return Err(AppError::Generation {
                    message: "upstream 500".into(),
                });
            }
            Ok("Aconite [Source 1].".to_string())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn chunk(book: &str, index: usize, page: Option<u32>, text: &str) -> Chunk {
        Chunk::new(
            text,
            ChunkMetadata {
                source_document_id: format!("data/{}.txt", book),
                book_name: book.to_string(),
                chunk_index: index,
                total_chunks: 5,
                page_number: page,
                chapter: None,
                entity_name: None,
            },
        )
    }

    async fn service_with(generator: Arc<ScriptedGenerator>) -> (RagService, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new(Arc::new(HashingEmbedder::new(128)), "remedies"));
        index
            .upsert(&[
                chunk("Kent", 0, Some(12), "ACONITUM. Sudden fear of death with restlessness."),
                chunk("Boericke", 0, Some(3), "ARSENICUM. Fear of death, anguish at night."),
                chunk("Kent", 1, None, &"ARNICA. Bruised soreness. ".repeat(40)),
            ])
            .await
            .unwrap();

        let service = RagService::new(
            index.clone(),
            generator,
            QueryCache::new(100, Duration::from_secs(3600)),
            RetrievalConfig::default(),
        );
        service.initialize().await.unwrap();
        (service, index)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator.clone()).await;

        let first = service
            .answer_question("Fear of death", None, Some(3))
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(first.answer, "Aconite [Source 1].");
        assert_eq!(first.citations.len(), 3);
        assert_eq!(generator.calls(), 1);

        let second = service
            .answer_question("  fear   OF death ", None, Some(3))
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.id, first.id);
        assert_eq!(second.question, "  fear   OF death ");
        assert_eq!(second.processing_time_ms, first.processing_time_ms);
        assert_eq!(generator.calls(), 1);

        let stats = service.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_citations_follow_rank_order() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator.clone()).await;

        let response = service
            .answer_question("fear of death", None, Some(3))
            .await
            .unwrap();

        let context = generator.last_context.lock().unwrap().clone();
        for (i, citation) in response.citations.iter().enumerate() {
            assert!(context.contains(&format!("[Source {}: {}]", i + 1, citation.citation)));
        }
        assert!(response.citations.iter().all(|c| c.page.is_some() || c.citation.contains("Section")));

        // Distinct, first-appearance order
        let mut expected = Vec::new();
        for c in &response.citations {
            if !expected.contains(&c.source) {
                expected.push(c.source.clone());
            }
        }
        assert_eq!(response.sources_used, expected);
    }

    #[tokio::test]
    async fn test_excerpt_truncated() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator).await;

        let response = service
            .answer_question("bruised soreness", Some(&["Kent".to_string()]), Some(5))
            .await
            .unwrap();

        let arnica = response
            .citations
            .iter()
            .find(|c| c.excerpt.starts_with("ARNICA"))
            .unwrap();
        assert_eq!(arnica.excerpt.chars().count(), 303);
        assert!(arnica.excerpt.ends_with("..."));
        assert_eq!(arnica.citation, "Kent - Section 2/5");
        assert!(response.sources_used.iter().all(|s| s == "Kent"));
    }

    #[tokio::test]
    async fn test_empty_result_not_cached() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, index) = service_with(generator.clone()).await;
        let filter = vec!["Clarke".to_string()];

        let response = service
            .answer_question("fear of death", Some(&filter), None)
            .await
            .unwrap();
        assert_eq!(response.answer, NO_RESULTS_ANSWER);
        assert!(response.citations.is_empty());
        assert!(response.sources_used.is_empty());
        assert_eq!(generator.calls(), 0);
        assert_eq!(service.cache_stats().size, 0);

        // Once the source is ingested the same question succeeds
        index
            .upsert(&[chunk("Clarke", 0, None, "ACONITE. Fear of death.")])
            .await
            .unwrap();
        let response = service
            .answer_question("fear of death", Some(&filter), None)
            .await
            .unwrap();
        assert!(!response.cached);
        assert_eq!(response.sources_used, vec!["Clarke".to_string()]);
    }

    #[tokio::test]
    async fn test_validation_never_touches_cache() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator.clone()).await;

        let err = service.answer_question("  a ", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = service.answer_question("fever", None, Some(21)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let stats = service.cache_stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_long_question_truncated() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator).await;

        let long = "fear ".repeat(200);
        assert_eq!(service.sanitize_question(&long).unwrap().chars().count(), 500);
        assert_eq!(service.sanitize_question("  ok  ").unwrap(), "ok");
        assert!(service.answer_question(&long, None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_generation_failure_surfaces_and_is_not_cached() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let (service, _) = service_with(generator).await;

        let err = service
            .answer_question("fear of death", None, None)
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        assert_eq!(service.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn test_empty_index_reports_not_initialized() {
        let index = Arc::new(MemoryIndex::new(Arc::new(HashingEmbedder::new(16)), "empty"));
        let service = RagService::new(
            index,
            Arc::new(ScriptedGenerator::new()),
            QueryCache::new(10, Duration::from_secs(60)),
            RetrievalConfig::default(),
        );

        let err = service.answer_question("fever", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));

        service.initialize().await.unwrap();
        service.initialize().await.unwrap();
        let err = service.answer_question("fever", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotInitialized { .. }));
        assert!(!service.is_ready());
    }

    #[tokio::test]
    async fn test_introspection_and_lifecycle() {
        let generator = Arc::new(ScriptedGenerator::new());
        let (service, _) = service_with(generator).await;

        assert_eq!(service.list_sources().await.unwrap(), vec!["Boericke", "Kent"]);
        let stats = service.knowledge_base_stats().await.unwrap();
        assert_eq!(stats.status, IndexStatus::Ready);
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.collection_name, "remedies");

        service.answer_question("fear of death", None, None).await.unwrap();
        assert_eq!(service.clear_cache(), 1);
        assert_eq!(service.cache_stats().misses, 1);

        service.answer_question("fear of death", None, None).await.unwrap();
        service.shutdown();
        assert!(!service.is_started());
        assert_eq!(service.cache_stats().size, 0);
    }

    #[test]
    fn test_excerpt_helper() {
        assert_eq!(excerpt("short", 300), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("ééé", 3), "ééé");
        assert_eq!(preview("ééé", 2), "éé");
    }
}
