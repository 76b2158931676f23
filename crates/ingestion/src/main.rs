//! DR-RAG Ingestion
//!
//! Builds or refreshes the corpus collection from a directory of books:
//! 1. Discovers .txt and .pdf files
//! 2. Splits each into cited chunks
//! 3. Embeds them and replaces each document's chunks in the corpus index
//! 4. Prints a collection summary

use anyhow::Context;
use clap::Parser;
use drrag_common::{
    config::{AppConfig, IndexBackend},
    embeddings::create_embedder,
    index::create_index,
    VERSION,
};
use drrag_ingestion::{Chunker, IngestionProcessor};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ingest", version, about = "Ingest documents into the DR-RAG corpus index")]
struct Args {
    /// Directory containing source documents (defaults to index.data_dir)
    #[arg(long, env = "DRRAG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Clear the collection before ingesting
    #[arg(long)]
    reset: bool,

    /// Chunk size in characters (overrides configuration)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Chunk overlap in characters (overrides configuration)
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Configuration file, instead of the layered config/ directory
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config);
    info!(service = %config.observability.service_name, "Starting DR-RAG ingestion v{}", VERSION);

    if let Some(size) = args.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        config.chunking.chunk_overlap = overlap;
    }
    config.validate_indexing()?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.index.data_dir));

    if config.index.backend == IndexBackend::Memory {
        warn!("Memory index backend selected; indexed chunks are lost when this process exits");
    }

    let chunker = Chunker::from_config(&config.chunking)?;
    info!(
        chunk_size = chunker.splitter().chunk_size(),
        chunk_overlap = chunker.splitter().chunk_overlap(),
        data_dir = %data_dir.display(),
        "Chunking documents"
    );

    let embedder = create_embedder(&config.embedding)?;
    let index = create_index(&config.index, embedder).await?;
    let processor = IngestionProcessor::new(index.clone(), chunker);

    if args.reset {
        processor.reset().await?;
    }

    let report = processor.process_directory(&data_dir).await?;
    if report.is_empty() {
        anyhow::bail!(
            "no documents were ingested; add .txt or .pdf files to {}",
            data_dir.display()
        );
    }

    let stats = index.stats().await?;
    let sources = index.list_sources().await?;

    println!("Ingestion complete");
    println!("  Status:          {:?}", stats.status);
    println!("  Chunks indexed:  {}", stats.count);
    println!("  Collection:      {}", stats.collection_name);
    println!("  Documents:       {}", report.documents.len());
    if !report.failures.is_empty() {
        println!("  Skipped:");
        for failure in &report.failures {
            println!("    - {} ({})", failure.path, failure.error);
        }
    }
    println!("  Sources ({}):", sources.len());
    for source in &sources {
        println!("    - {}", source);
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}
