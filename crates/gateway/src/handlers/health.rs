//! Health check handlers

use axum::{extract::State, Json};
use drrag_common::index::IndexStatus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub components: HealthComponents,
}

#[derive(Serialize)]
pub struct HealthComponents {
    pub rag: RagCheck,
    pub cache: CacheCheck,
}

#[derive(Serialize)]
pub struct RagCheck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CacheCheck {
    pub status: &'static str,
    pub size: usize,
    pub hit_rate: String,
}

#[derive(Serialize)]
pub struct ApiInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub health: &'static str,
}

/// Service health; `degraded` until the knowledge base holds documents
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let rag = match state.rag.knowledge_base_stats().await {
        Ok(stats) => RagCheck {
            status: if stats.status == IndexStatus::Ready {
                "healthy"
            } else {
                "degraded"
            },
            document_count: Some(stats.document_count),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the knowledge base");
            RagCheck {
                status: "unhealthy",
                document_count: None,
                error: Some(e.public_message()),
            }
        }
    };

    let cache_stats = state.rag.cache_stats();

    Json(HealthResponse {
        status: if rag.status == "healthy" { "healthy" } else { "degraded" },
        version: drrag_common::VERSION,
        components: HealthComponents {
            rag,
            cache: CacheCheck {
                status: "healthy",
                size: cache_stats.size,
                hit_rate: format!("{}%", cache_stats.hit_rate_percent),
            },
        },
    })
}

pub async fn root() -> Json<ApiInfo> {
    Json(ApiInfo {
        name: "DR-RAG API",
        description: "Remedy corpus question answering with citations",
        version: drrag_common::VERSION,
        health: "/health",
    })
}
