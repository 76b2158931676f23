//! Error types for DR-RAG services
//!
//! Every failure carries a kind the presentation layer can map: validation
//! problems go back to the caller verbatim, an empty knowledge base is a
//! degraded state, and upstream failures (corpus index, embedder, generator)
//! reach end users only as a generic message while the cause is logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Message returned to callers in place of upstream failure details
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to process query. Please try again.";

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Availability (4xxx)
    NotInitialized,

    // Database errors (7xxx)
    DatabaseError,

    // External service errors (8xxx)
    UpstreamError,
    CorpusIndexError,
    EmbeddingError,
    GenerationError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::NotInitialized => 4001,

            ErrorCode::DatabaseError => 7001,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::CorpusIndexError => 8002,
            ErrorCode::EmbeddingError => 8003,
            ErrorCode::GenerationError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    // Degraded service
    #[error("Knowledge base not initialized: {message}")]
    NotInitialized { message: String },

    // Upstream collaborators
    #[error("Corpus index error: {message}")]
    CorpusIndex { message: String },

    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("Generation service error: {message}")]
    Generation { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation failure on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::NotInitialized { .. } => ErrorCode::NotInitialized,
            AppError::CorpusIndex { .. } => ErrorCode::CorpusIndexError,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::Generation { .. } => ErrorCode::GenerationError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,

            // 500 Internal Server Error
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::CorpusIndex { .. } |
            AppError::Embedding { .. } |
            AppError::Generation { .. } |
            AppError::Database(_) |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::NotInitialized { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Failures of the corpus index, the embedder or the generator
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::CorpusIndex { .. }
                | AppError::Embedding { .. }
                | AppError::Generation { .. }
                | AppError::Database(_)
                | AppError::HttpClient(_)
        )
    }

    /// Whether an outer layer may sensibly retry the same request
    pub fn is_retryable(&self) -> bool {
        self.is_upstream() || matches!(self, AppError::NotInitialized { .. })
    }

    /// Text that is safe to show to end users
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => message.clone(),
            AppError::NotInitialized { .. } => {
                "Knowledge base not initialized. Please run ingestion first.".to_string()
            }
            _ if self.is_upstream() => GENERIC_FAILURE_MESSAGE.to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log the cause; only the public message leaves the process
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message: self.public_message(),
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
