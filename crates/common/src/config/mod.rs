//! Configuration management for DR-RAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Corpus index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Answer generation configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Document chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval and context assembly configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Corpus index storage backend
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process index, lost on restart
    Memory,
    /// PostgreSQL with the pgvector extension
    Pgvector,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,

    /// PostgreSQL URL, required for the pgvector backend
    pub database_url: Option<String>,

    /// Logical collection the chunks belong to
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Maximum number of database connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Source documents; the gateway ingests them at startup on the memory backend
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Embedding provider
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings endpoint
    #[serde(rename = "openai")]
    OpenAi,
    /// Deterministic offline feature hashing
    Hashing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Answer generation backend, chosen once at startup
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: GenerationProvider,

    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    pub openrouter_api_key: Option<String>,

    #[serde(default = "default_openrouter_model")]
    pub openrouter_model: String,

    #[serde(default = "default_openrouter_base_url")]
    pub openrouter_base_url: String,

    /// Sampling temperature; kept low for factual answers
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between adjacent chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// When set, hits farther than this distance are dropped before assembly
    pub max_distance: Option<f32>,

    /// Upper bound on the assembled context string
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: Option<usize>,

    /// Length of the chunk preview attached to each citation
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    #[serde(default = "default_min_question_chars")]
    pub min_question_chars: usize,

    /// Longer questions are truncated, not rejected
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached answers
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_index_backend() -> IndexBackend { IndexBackend::Memory }
fn default_collection_name() -> String { crate::DEFAULT_COLLECTION_NAME.to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout() -> u64 { 10 }
fn default_data_dir() -> String { "data".to_string() }
fn default_embedding_provider() -> EmbeddingProvider { EmbeddingProvider::Hashing }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_generation_provider() -> GenerationProvider { GenerationProvider::OpenAi }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_openrouter_model() -> String { "nvidia/nemotron-3-nano-30b-a3b:free".to_string() }
fn default_openrouter_base_url() -> String { "https://openrouter.ai/api/v1".to_string() }
fn default_temperature() -> f32 { 0.1 }
fn default_max_tokens() -> u32 { 1024 }
fn default_generation_timeout() -> u64 { 60 }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 200 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 20 }
fn default_max_context_chars() -> Option<usize> { Some(8000) }
fn default_excerpt_chars() -> usize { 300 }
fn default_min_question_chars() -> usize { 2 }
fn default_max_question_chars() -> usize { 500 }
fn default_cache_max_size() -> usize { 1000 }
fn default_cache_ttl() -> u64 { 24 * 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "drrag".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__CACHE__MAX_SIZE=500
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Load from a specific configuration file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Pick up the conventional provider key variables when no key is configured
    fn apply_env_fallbacks(&mut self) {
        let openai_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        if self.generation.openai_api_key.is_none() {
            self.generation.openai_api_key = openai_key.clone();
        }
        if self.generation.openrouter_api_key.is_none() {
            self.generation.openrouter_api_key =
                std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if self.embedding.api_key.is_none() {
            self.embedding.api_key = openai_key;
        }
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        self.validate_indexing()?;
        self.generation.api_key()?;
        Ok(())
    }

    /// Checks needed to build and query the corpus index, without generation
    pub fn validate_indexing(&self) -> Result<()> {
        if self.cache.max_size == 0 {
            return Err(configuration("cache.max_size must be at least 1"));
        }
        if self.chunking.chunk_size == 0 {
            return Err(configuration("chunking.chunk_size must be at least 1"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(configuration(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if self.retrieval.max_top_k == 0
            || self.retrieval.default_top_k == 0
            || self.retrieval.default_top_k > self.retrieval.max_top_k
        {
            return Err(configuration(
                "retrieval.default_top_k must be within 1..=retrieval.max_top_k",
            ));
        }
        if self.retrieval.min_question_chars > self.retrieval.max_question_chars {
            return Err(configuration(
                "retrieval.min_question_chars exceeds retrieval.max_question_chars",
            ));
        }
        if self.index.backend == IndexBackend::Pgvector && self.index.database_url.is_none() {
            return Err(configuration("index.database_url is required for the pgvector backend"));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi && self.embedding.api_key.is_none() {
            return Err(configuration("embedding.api_key (or OPENAI_API_KEY) is required"));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl GenerationConfig {
    /// API key of the selected provider
    pub fn api_key(&self) -> Result<&str> {
        let (key, name) = match self.provider {
            GenerationProvider::OpenAi => (&self.openai_api_key, "generation.openai_api_key (or OPENAI_API_KEY)"),
            GenerationProvider::OpenRouter => {
                (&self.openrouter_api_key, "generation.openrouter_api_key (or OPENROUTER_API_KEY)")
            }
        };
        key.as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| configuration(&format!("{} is required", name)))
    }

    /// Base URL of the selected provider
    pub fn base_url(&self) -> &str {
        match self.provider {
            GenerationProvider::OpenAi => &self.openai_base_url,
            GenerationProvider::OpenRouter => &self.openrouter_base_url,
        }
    }

    /// Model name of the selected provider
    pub fn model(&self) -> &str {
        match self.provider {
            GenerationProvider::OpenAi => &self.openai_model,
            GenerationProvider::OpenRouter => &self.openrouter_model,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn configuration(message: &str) -> AppError {
    AppError::Configuration {
        message: message.to_string(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            database_url: None,
            collection_name: default_collection_name(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_base_url: default_openai_base_url(),
            openrouter_api_key: None,
            openrouter_model: default_openrouter_model(),
            openrouter_base_url: default_openrouter_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_distance: None,
            max_context_chars: default_max_context_chars(),
            excerpt_chars: default_excerpt_chars(),
            min_question_chars: default_min_question_chars(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.generation.openai_api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.index.collection_name, "homeopathy_remedies");
    }

    #[test]
    fn test_validate_accepts_keyed_defaults() {
        assert!(keyed_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_generation_key() {
        let config = AppConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));

        // Ingestion does not generate answers
        assert!(config.validate_indexing().is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_chunk() {
        let mut config = keyed_config();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cache() {
        let mut config = keyed_config();
        config.cache.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pgvector_requires_database_url() {
        let mut config = keyed_config();
        config.index.backend = IndexBackend::Pgvector;
        assert!(config.validate().is_err());

        config.index.database_url = Some("postgres://localhost/drrag".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_selection() {
        let mut config = keyed_config().generation;
        assert_eq!(config.model(), "gpt-4o-mini");
        assert_eq!(config.base_url(), "https://api.openai.com/v1");

        config.provider = GenerationProvider::OpenRouter;
        assert_eq!(config.base_url(), "https://openrouter.ai/api/v1");
        assert!(config.api_key().is_err());

        config.openrouter_api_key = Some("or-test".to_string());
        assert_eq!(config.api_key().unwrap(), "or-test");
    }

    #[test]
    fn test_provider_names_deserialize() {
        let provider: GenerationProvider = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(provider, GenerationProvider::OpenRouter);

        let backend: IndexBackend = serde_json::from_str("\"pgvector\"").unwrap();
        assert_eq!(backend, IndexBackend::Pgvector);
    }
}
