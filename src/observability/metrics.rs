//! Metrics exposition.
//!
//! # Metrics
//! - `backend_unhealthy`, `backend_busy`, `backend_fail` (counters):
//!   acquisition refusals
//! - `backend_retry` (counter): stale recycled connections retried
//! - `backend_recycle` (counter): connections returned to the idle pool
//! - `backend_conn`, `backend_req` (counters, `backend` label)
//! - `backend_healthy` (gauge, `backend` label): 1=healthy, 0=sick
//! - `backend_connections` (gauge, `backend` label): live connections

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn describe() {
    describe_counter!("backend_unhealthy", "Acquisitions refused: backend unhealthy");
    describe_counter!("backend_busy", "Acquisitions refused: max_connections reached");
    describe_counter!("backend_fail", "Acquisitions failed: no connection from pool");
    describe_counter!("backend_retry", "Stale recycled connections retried");
    describe_counter!("backend_recycle", "Connections returned to the idle pool");
    describe_counter!("backend_conn", "Connections handed out per backend");
    describe_counter!("backend_req", "Requests sent per backend");
    describe_gauge!("backend_healthy", "Backend health verdict (1=healthy)");
    describe_gauge!("backend_connections", "Live connections per backend");
}

/// Publish a backend's health verdict.
pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!("backend_healthy", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

/// Publish a backend's live connection count.
pub fn record_backend_connections(backend: &str, n_conn: usize) {
    gauge!("backend_connections", "backend" => backend.to_string()).set(n_conn as f64);
}
