//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, loaded versions, promotions, uploads)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by status and routing outcome
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_versions_loaded` (gauge): live entries in the version table
//! - `proxy_promotions_total` (counter): promotion attempts by result
//! - `proxy_uploads_total` (counter): package uploads by result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request. `outcome` is the routing decision that produced
/// the response (`proxied`, `no_version`, `unauthorized`, ...).
pub fn record_request(status: u16, outcome: &'static str, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_versions_loaded(count: usize) {
    ::metrics::gauge!("proxy_versions_loaded").set(count as f64);
}

pub fn record_promotion(result: &'static str) {
    ::metrics::counter!("proxy_promotions_total", "result" => result).increment(1);
}

pub fn record_upload(result: &'static str) {
    ::metrics::counter!("proxy_uploads_total", "result" => result).increment(1);
}
