//! Ingestion error types

use drrag_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    /// Fails the single document; a directory batch continues with its siblings
    #[error("Unsupported document format '{format}': {path}")]
    UnsupportedFormat { path: String, format: String },

    #[error("PDF parse error for {path}: {message}")]
    PdfParse { path: String, message: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Data directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Invalid chunking settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corpus index error: {0}")]
    Index(#[from] AppError),
}

impl IngestionError {
    /// Whether the failure is confined to one document
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            IngestionError::UnsupportedFormat { .. }
                | IngestionError::PdfParse { .. }
                | IngestionError::FileNotFound(_)
                | IngestionError::Io(_)
        )
    }
}
