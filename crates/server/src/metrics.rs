//! Prometheus metrics for the quay server.
//!
//! Covers the upload pipeline (files, bytes, chunks, finalizes, swept
//! sessions) and the serving path (resolver outcomes, HTML rewrites, proxy
//! latency).
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Labels never carry site ids or paths, only strategy and bundler names.
//! Restrict the endpoint at the network level when the server is public.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static FILES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_files_written_total",
        "Total number of files written to the blob store",
    )
    .expect("metric creation failed")
});

pub static BYTES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_bytes_written_total",
        "Total bytes written to the blob store",
    )
    .expect("metric creation failed")
});

pub static FILE_WRITE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_file_write_failures_total",
        "Total number of individual file writes that failed",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_chunks_received_total",
        "Total number of upload chunks acknowledged",
    )
    .expect("metric creation failed")
});

pub static CHUNK_BATCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "quay_chunk_batch_duration_seconds",
            "Time taken to write one upload batch",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static SESSIONS_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_sessions_finalized_total",
        "Total number of finalize calls that persisted a site",
    )
    .expect("metric creation failed")
});

pub static INCOMPLETE_FINALIZES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_incomplete_finalizes_total",
        "Total number of finalize calls on a session with missing chunks",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "quay_sessions_expired_total",
        "Total number of idle upload sessions discarded by the sweeper",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "quay_active_upload_sessions",
        "Upload sessions currently held, as of the last sweep",
    )
    .expect("metric creation failed")
});

// Serving metrics
pub static RESOLVER_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "quay_resolver_outcomes_total",
            "Asset resolutions by matching strategy",
        ),
        &["strategy"],
    )
    .expect("metric creation failed")
});

pub static HTML_REWRITES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("quay_html_rewrites_total", "Entry documents rewritten by bundler"),
        &["bundler"],
    )
    .expect("metric creation failed")
});

pub static PROXY_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "quay_proxy_request_duration_seconds",
            "Time taken to answer a proxied site request",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["status"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests may build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(FILES_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FILE_WRITE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_BATCH_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_FINALIZED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INCOMPLETE_FINALIZES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_EXPIRED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_SESSIONS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(RESOLVER_OUTCOMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HTML_REWRITES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROXY_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record which resolver strategy answered a request.
pub fn record_resolution(strategy: &str) {
    RESOLVER_OUTCOMES.with_label_values(&[strategy]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics();
        register_metrics();
        record_resolution("exact");
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|mf| mf.get_name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "quay_resolver_outcomes_total"));
    }

    #[tokio::test]
    async fn test_metrics_handler_encodes_text() {
        register_metrics();
        FILES_WRITTEN.inc();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("quay_files_written_total"));
    }
}
