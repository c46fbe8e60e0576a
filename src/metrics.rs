//! Run observability metrics
//!
//! Counters and histograms go through the `metrics` facade. Without an
//! installed recorder every call is a no-op, so the pipeline records
//! unconditionally and `main` decides whether to expose a Prometheus
//! scrape endpoint.
//!
//! ## Metrics
//!
//! - `pages_fetched_total`, `items_per_page`
//! - `http_requests_total{status}`, `http_request_duration_seconds`
//! - `http_retries_total{attempt}`, `retry_backoff_duration_seconds`
//! - `media_fetches_total{outcome}`, `media_cache_hits_total`
//! - `items_converted_total{outcome}`
//! - `batches_resolved_total{status}`, `batch_duration_seconds`

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: a second call is a no-op.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!("pages_fetched_total", Unit::Count, "Content pages fetched");
    describe_histogram!("items_per_page", Unit::Count, "Items received per page");
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests sent, labelled by status (0 = transport error)"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!("http_retries_total", Unit::Count, "Retry attempts scheduled");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_counter!(
        "media_fetches_total",
        Unit::Count,
        "Media resolutions that reached the network, by outcome"
    );
    describe_counter!(
        "media_cache_hits_total",
        Unit::Count,
        "Media resolutions answered from the per-run cache"
    );
    describe_counter!(
        "items_converted_total",
        Unit::Count,
        "Items converted, by outcome"
    );
    describe_counter!(
        "batches_resolved_total",
        Unit::Count,
        "Batches resolved, by status"
    );
    describe_histogram!(
        "batch_duration_seconds",
        Unit::Seconds,
        "Wall time spent processing one batch"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if the exporter is installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// One HTTP request finished; `status` is 0 for transport errors
pub fn record_http_request(status: u16, elapsed: Duration) {
    counter!("http_requests_total", "status" => status.to_string()).increment(1);
    histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

    if status == 429 {
        warn!(duration_ms = elapsed.as_millis(), "Rate limit response (429) recorded");
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("http_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// One content page received
pub fn record_page_fetched(items: usize) {
    counter!("pages_fetched_total").increment(1);
    histogram!("items_per_page").record(items as f64);
}

/// One media URL resolved over the network; `outcome` is `success`, `skipped` or `failed`
pub fn record_media_fetch(outcome: &'static str) {
    counter!("media_fetches_total", "outcome" => outcome).increment(1);
}

/// Media resolution served from the cache
pub fn record_media_cache_hit() {
    counter!("media_cache_hits_total").increment(1);
}

/// One item finished converting
pub fn record_item_converted(outcome: &'static str) {
    counter!("items_converted_total", "outcome" => outcome).increment(1);
}

/// One batch resolved
pub fn record_batch_resolved(status: &'static str, elapsed: Duration) {
    counter!("batches_resolved_total", "status" => status).increment(1);
    histogram!("batch_duration_seconds").record(elapsed.as_secs_f64());
}
