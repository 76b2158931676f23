//! Startup corpus loading for the in-process index
//!
//! A memory index starts empty in every process, so the gateway fills it
//! from `index.data_dir` before serving. Persistent backends are left alone.

use drrag_common::{
    config::{AppConfig, IndexBackend},
    index::CorpusIndex,
};
use drrag_ingestion::{Chunker, IngestionError, IngestionProcessor, IngestionReport};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Ingest the data directory when the memory backend is configured
///
/// A missing directory is reported and leaves the index empty; any other
/// ingestion failure stops startup.
pub async fn preload(
    config: &AppConfig,
    index: Arc<dyn CorpusIndex>,
) -> anyhow::Result<Option<IngestionReport>> {
    if config.index.backend != IndexBackend::Memory {
        return Ok(None);
    }

    let data_dir = Path::new(&config.index.data_dir);
    info!(data_dir = %data_dir.display(), "Loading corpus into memory index");

    let processor = IngestionProcessor::new(index, Chunker::from_config(&config.chunking)?);
    match processor.process_directory(data_dir).await {
        Ok(report) => {
            info!(
                documents = report.documents.len(),
                chunks = report.total_chunks,
                skipped = report.failures.len(),
                "Corpus loaded"
            );
            Ok(Some(report))
        }
        Err(IngestionError::DirectoryNotFound(dir)) => {
            warn!(data_dir = %dir, "Data directory not found; serving an empty knowledge base");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
