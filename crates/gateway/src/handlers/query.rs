//! Query handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::AppState;
use drrag_common::{
    cache::CacheStats,
    context::{KnowledgeBaseStats, QueryResponse},
    errors::{AppError, Result},
};

/// Question submission
///
/// Length bounds here only reject oversized payloads; the service applies
/// the minimum length and truncates long questions.
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// Restrict retrieval to these source books
    #[serde(default)]
    pub source_filter: Option<Vec<String>>,

    /// Chunks to retrieve; the configured default when absent
    #[serde(default)]
    #[validate(range(min = 1, max = 20))]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub sources: Vec<String>,
    pub count: usize,
}

fn validation_error(errors: ValidationErrors) -> AppError {
    let field = errors.field_errors().keys().next().map(|f| f.to_string());
    AppError::Validation {
        message: errors.to_string(),
        field,
    }
}

/// Answer a question with citations
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    request.validate().map_err(validation_error)?;

    let response = state
        .rag
        .answer_question(
            &request.question,
            request.source_filter.as_deref(),
            request.top_k,
        )
        .await?;

    Ok(Json(response))
}

/// Source books available for filtering
pub async fn sources(State(state): State<AppState>) -> Result<Json<SourcesResponse>> {
    let sources = state.rag.list_sources().await?;
    Ok(Json(SourcesResponse {
        count: sources.len(),
        sources,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<KnowledgeBaseStats>> {
    Ok(Json(state.rag.knowledge_base_stats().await?))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.rag.cache_stats())
}

/// Drop cached answers, e.g. after re-ingestion
pub async fn cache_clear(State(state): State<AppState>) -> StatusCode {
    state.rag.clear_cache();
    StatusCode::NO_CONTENT
}
