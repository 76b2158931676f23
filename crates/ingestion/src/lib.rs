//! DR-RAG ingestion library
//!
//! Document loading, chunking with provenance metadata and the
//! directory-level ingestion batch used by the `ingest` binary.

pub mod chunker;
pub mod errors;
pub mod loader;
pub mod metadata;
pub mod pdf;
pub mod processor;

pub use chunker::{Chunker, RecursiveSplitter};
pub use errors::IngestionError;
pub use loader::{load_document, Document, DocumentFormat};
pub use processor::{IngestionProcessor, IngestionReport};
