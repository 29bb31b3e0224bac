//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, cluster, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by new state
//! - `gateway_cache_lookups_total` (counter): cache lookups by x-cache-status
//! - `gateway_cache_entries` / `gateway_cache_bytes` (gauges)
//! - `gateway_retries_total` (counter): retries by cluster
//! - `gateway_upstream_errors_total` (counter): failed attempts by kind
//!
//! Without an installed recorder every call is a no-op, so the core never
//! depends on the exporter being enabled.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, cluster: &str, status: u16, latency: Duration) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "cluster" => cluster.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_backend_health(cluster: &str, backend: &str, healthy: bool) {
    gauge!(
        "gateway_backend_health",
        "cluster" => cluster.to_string(),
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_transition(cluster: &str, backend: &str, state: &str) {
    counter!(
        "gateway_circuit_transitions_total",
        "cluster" => cluster.to_string(),
        "backend" => backend.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_cache_lookup(status: &str) {
    counter!("gateway_cache_lookups_total", "status" => status.to_string()).increment(1);
}

pub fn set_cache_size(entries: usize, bytes: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
    gauge!("gateway_cache_bytes").set(bytes as f64);
}

pub fn record_retry(cluster: &str) {
    counter!("gateway_retries_total", "cluster" => cluster.to_string()).increment(1);
}

pub fn record_upstream_error(cluster: &str, kind: &str) {
    counter!(
        "gateway_upstream_errors_total",
        "cluster" => cluster.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}
