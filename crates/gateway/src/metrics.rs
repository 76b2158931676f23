//! Prometheus exporter

use axum::{routing::get, Router};
use drrag_common::metrics::{register_metrics, EMBEDDING_BUCKETS, METRICS_PREFIX, QUERY_BUCKETS};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the global recorder with the latency buckets
pub fn install_exporter() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_query_duration_seconds", METRICS_PREFIX)),
            QUERY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
            EMBEDDING_BUCKETS,
        )?
        .install_recorder()?;

    register_metrics();
    Ok(handle)
}

/// `/metrics` scrape endpoint
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}
