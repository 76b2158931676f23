//! DR-RAG Common Library
//!
//! Shared code for the DR-RAG services including:
//! - Chunk data model with stable citations
//! - Bounded TTL/LRU query cache
//! - Corpus index abstraction (in-memory and pgvector backends)
//! - Retrieval and citation-aligned context assembly
//! - Answer generation client and the orchestrating RAG service
//! - Error types, configuration and metrics

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use cache::QueryCache;
pub use config::AppConfig;
pub use context::{RagService, Retriever};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::CorpusIndex;
pub use models::{Chunk, ChunkMetadata, RetrievalHit};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default corpus collection name
pub const DEFAULT_COLLECTION_NAME: &str = "homeopathy_remedies";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
