//! Core data model shared by ingestion and retrieval

mod chunk;

pub use chunk::{build_citation, Chunk, ChunkMetadata, RetrievalHit};
