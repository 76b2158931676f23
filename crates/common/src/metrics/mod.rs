//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming. Recording is a no-op until a
//! recorder (the gateway's Prometheus exporter) is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all DR-RAG metrics
pub const METRICS_PREFIX: &str = "drrag";

/// Buckets for end-to-end query latency (in seconds); generation dominates
pub const QUERY_BUCKETS: &[f64] = &[
    0.005,  // 5ms - cache hits
    0.025,  // 25ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.001,  // 1ms - local hashing
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// How a query was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Cached,
    Generated,
    Empty,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::Cached => "cached",
            QueryOutcome::Generated => "generated",
            QueryOutcome::Empty => "empty",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total answered questions by outcome"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
    );

    describe_histogram!(
        format!("{}_retrieval_hits", METRICS_PREFIX),
        Unit::Count,
        "Number of hits assembled into the context"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total query cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total query cache misses"
    );

    describe_counter!(
        format!("{}_cache_evictions_total", METRICS_PREFIX),
        Unit::Count,
        "Total query cache evictions (capacity and expiry)"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents processed by status"
    );

    describe_counter!(
        format!("{}_chunks_indexed_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks written to the corpus index"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a finished question
pub fn record_query(duration_secs: f64, outcome: QueryOutcome, hits: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    if outcome != QueryOutcome::Cached {
        histogram!(format!("{}_retrieval_hits", METRICS_PREFIX)).record(hits as f64);
    }
}

/// Helper to record cache lookups
pub fn record_cache(hit: bool) {
    if hit {
        counter!(format!("{}_cache_hits_total", METRICS_PREFIX)).increment(1);
    } else {
        counter!(format!("{}_cache_misses_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record cache evictions
pub fn record_cache_eviction(reason: &'static str) {
    counter!(
        format!("{}_cache_evictions_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record ingestion metrics
pub fn record_ingestion(success: bool, chunks_indexed: usize) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    if chunks_indexed > 0 {
        counter!(format!("{}_chunks_indexed_total", METRICS_PREFIX))
            .increment(chunks_indexed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [QUERY_BUCKETS, EMBEDDING_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every helper must be a silent no-op
        record_query(0.2, QueryOutcome::Generated, 3);
        record_cache(true);
        record_cache_eviction("capacity");
        record_embedding(0.01, "hashing-384", true);
        record_ingestion(false, 0);
        assert_eq!(QueryOutcome::Empty.as_str(), "empty");
    }
}
