//! Database layer for the pgvector corpus index
//!
//! Provides:
//! - SeaORM entity model for indexed chunks
//! - Repository with raw-SQL vector operations
//! - Connection pool management

pub mod models;
mod repository;

pub use repository::ChunkRepository;

use crate::config::IndexConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    connection: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &IndexConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| AppError::Configuration {
                message: "index.database_url is required for the pgvector backend".to_string(),
            })?;

        info!("Connecting to corpus database...");

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let connection = Database::connect(opts)
            .await
            .map_err(|e| AppError::CorpusIndex {
                message: format!("Failed to connect to corpus database: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { connection })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::CorpusIndex {
                message: format!("Database ping failed: {}", e),
            })?;

        Ok(())
    }
}
