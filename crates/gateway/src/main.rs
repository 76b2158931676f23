//! DR-RAG API Gateway
//!
//! HTTP surface over the RAG service.
//! Handles:
//! - Question answering with citations
//! - Knowledge base and cache introspection
//! - Health and Prometheus metrics

mod corpus;
mod handlers;
mod metrics;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use drrag_common::{config::AppConfig, context::RagService, VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<RagService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);

    info!(service = %config.observability.service_name, "Starting DR-RAG API Gateway v{}", VERSION);
    config.validate()?;

    if config.observability.metrics_port != 0 {
        let handle = metrics::install_exporter()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        let listener = TcpListener::bind(addr).await?;
        info!("Metrics exporter listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics::metrics_router(handle)).await {
                error!(error = %e, "Metrics exporter stopped");
            }
        });
    }

    let rag = Arc::new(RagService::from_config(&config).await?);
    corpus::preload(&config, rag.index().clone()).await?;
    rag.initialize().await?;

    let app = create_router(AppState { rag: rag.clone() }, config.request_timeout());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout()))
        .await?;

    rag.shutdown();
    info!("Server shutdown complete");
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

/// Create the main application router
fn create_router(state: AppState, request_timeout: Duration) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route("/v1/query", post(handlers::query::query))
        .route("/v1/query/sources", get(handlers::query::sources))
        .route("/v1/query/stats", get(handlers::query::stats))
        .route("/v1/query/cache-stats", get(handlers::query::cache_stats))
        .route("/v1/query/cache-clear", post(handlers::query::cache_clear))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
///
/// In-flight requests get `grace` to finish before the process exits.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
