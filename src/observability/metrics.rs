//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): requests by method, status, backend
//! - `lb_request_duration_seconds` (histogram): end-to-end latency
//! - `lb_rate_limited_total` (counter): requests rejected with 429
//! - `lb_backend_healthy` (gauge): 1=healthy, 0=unhealthy, per backend
//! - `lb_persist_dropped_total` (counter): bucket snapshots lost to queue overflow
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users
//!   and tests pay nothing
//! - The Prometheus exporter serves its own listener, separate from the proxy

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("status", status.to_string()),
        Label::new("backend", backend.to_string()),
    ];
    counter!("lb_requests_total", labels.clone()).increment(1);
    histogram!("lb_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("lb_rate_limited_total").increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("lb_backend_healthy", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_persist_dropped(count: u64) {
    counter!("lb_persist_dropped_total").increment(count);
}
