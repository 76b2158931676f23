//! Ingestion processor
//!
//! Directory-level batch: discover, load, chunk and index each document.

use crate::chunker::Chunker;
use crate::errors::IngestionError;
use crate::loader::{discover_documents, load_document};
use drrag_common::index::CorpusIndex;
use drrag_common::metrics::record_ingestion;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Outcome for one indexed document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub path: String,
    pub book_name: String,
    pub chunks: usize,
}

/// A document that was skipped because it could not be processed
#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub documents: Vec<DocumentReport>,
    pub failures: Vec<FailedDocument>,
    pub total_chunks: usize,
}

impl IngestionReport {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

pub struct IngestionProcessor {
    index: Arc<dyn CorpusIndex>,
    chunker: Chunker,
}

impl IngestionProcessor {
    pub fn new(index: Arc<dyn CorpusIndex>, chunker: Chunker) -> Self {
        Self { index, chunker }
    }

    pub fn index(&self) -> &Arc<dyn CorpusIndex> {
        &self.index
    }

    /// Drop every chunk of the collection
    pub async fn reset(&self) -> Result<(), IngestionError> {
        info!(collection = self.index.collection_name(), "Clearing collection");
        self.index.reset().await?;
        Ok(())
    }

    /// Load, chunk and index one file
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn process_file(&self, path: &Path) -> Result<DocumentReport, IngestionError> {
        let document = load_document(path)?;
        let chunks = self.chunker.split(&document)?;
        let written = self
            .index
            .replace_document(&document.source_document_id, &chunks)
            .await?;

        record_ingestion(true, written);
        info!(book = %document.book_name, chunks = written, "Document indexed");

        Ok(DocumentReport {
            path: document.source_document_id,
            book_name: document.book_name,
            chunks: written,
        })
    }

    /// Process every supported file in `dir`
    ///
    /// A document that fails to load or chunk is logged and reported while
    /// its siblings continue; a corpus index failure ends the batch.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn process_directory(&self, dir: &Path) -> Result<IngestionReport, IngestionError> {
        let paths = discover_documents(dir)?;
        info!(files = paths.len(), "Starting ingestion");

        let mut report = IngestionReport::default();
        for path in paths {
            match self.process_file(&path).await {
                Ok(document) => {
                    report.total_chunks += document.chunks;
                    report.documents.push(document);
                }
                Err(e) if e.is_document_level() => {
                    warn!(file = %path.display(), error = %e, "Skipping document");
                    record_ingestion(false, 0);
                    report.failures.push(FailedDocument {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Ingestion aborted");
                    record_ingestion(false, 0);
                    return Err(e);
                }
            }
        }

        info!(
            documents = report.documents.len(),
            failures = report.failures.len(),
            chunks = report.total_chunks,
            "Ingestion complete"
        );
        Ok(report)
    }
}
