//! Prometheus metrics for the vault server.
//!
//! Exposes counters for uploads, deduplication, reference releases and
//! downloads, plus an upload latency histogram.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no owners, filenames or digests, only aggregate usage.
//! The endpoint MUST be network-restricted to authorized scrapers at the
//! infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static FILES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_files_created_total",
        "Total number of uploads that stored new content",
    )
    .expect("metric creation failed")
});

pub static FILES_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_files_deduplicated_total",
        "Total number of uploads resolved to existing content",
    )
    .expect("metric creation failed")
});

pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_bytes_stored_total",
        "Total bytes written to blob storage (new content only)",
    )
    .expect("metric creation failed")
});

pub static BYTES_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_bytes_deduplicated_total",
        "Total bytes not stored thanks to deduplication",
    )
    .expect("metric creation failed")
});

pub static DIGEST_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_digest_conflicts_total",
        "Total record inserts that lost a race on the content digest",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "vault_upload_duration_seconds",
            "Time taken to store a single uploaded file",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("vault_upload_errors_total", "Total upload errors by error type"),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Delete metrics
pub static REFERENCES_RELEASED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_references_released_total",
        "Total number of references dropped by delete requests",
    )
    .expect("metric creation failed")
});

pub static RECORDS_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_records_removed_total",
        "Total number of file records removed after their last reference",
    )
    .expect("metric creation failed")
});

pub static BLOB_DELETE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_blob_delete_failures_total",
        "Total number of blobs that could not be removed after their record was deleted",
    )
    .expect("metric creation failed")
});

// Download metrics
pub static DOWNLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("vault_downloads_total", "Total downloads started by kind"),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests or when embedding multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(FILES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FILES_DEDUPLICATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_DEDUPLICATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DIGEST_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(REFERENCES_RELEASED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECORDS_REMOVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_DELETE_FAILURES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(DOWNLOADS.clone()))
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

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

/// Helper to record a started download (`owner` or `public`).
pub fn record_download(kind: &str) {
    DOWNLOADS.with_label_values(&[kind]).inc();
}
