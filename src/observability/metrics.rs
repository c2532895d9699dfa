//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_proxy_requests_total` (counter): proxied requests by method, status
//! - `gateway_proxy_request_duration_seconds` (histogram): latency distribution
//! - `gateway_proxy_errors_total` (counter): forwarding failures by error kind
//! - `gateway_sessions_active` (gauge): live sessions in the registry
//! - `gateway_sessions_closed_total` (counter): closed sessions by reason
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in via config

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_proxy_request(method: &str, status: u16, started: Instant) {
    metrics::counter!(
        "gateway_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_proxy_request_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_proxy_error(kind: &'static str) {
    metrics::counter!("gateway_proxy_errors_total", "kind" => kind).increment(1);
}

pub fn record_active_sessions(count: usize) {
    metrics::gauge!("gateway_sessions_active").set(count as f64);
}

pub fn record_session_closed(reason: &'static str) {
    metrics::counter!("gateway_sessions_closed_total", "reason" => reason).increment(1);
}
