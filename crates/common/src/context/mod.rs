//! Retrieval and answer assembly
//!
//! Provides:
//! - Similarity retrieval with citation-aligned context assembly
//! - The answer generation seam and its chat-completions client
//! - The RAG service tying cache, retrieval and generation together

mod rag_service;
mod retriever;
mod synthesizer;

pub use rag_service::{Citation, KnowledgeBaseStats, QueryResponse, RagService, NO_RESULTS_ANSWER};
pub use retriever::{ContextBundle, Retriever, SOURCE_SEPARATOR};
pub use synthesizer::{ChatCompletionGenerator, Generator};
