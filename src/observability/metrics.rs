//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): served connections by outcome
//! - `proxy_request_duration_seconds` (histogram): accept to last byte
//! - `proxy_bytes_relayed_total` (counter): bytes by direction
//! - `proxy_upstream_errors_total` (counter): by error kind
//! - `proxy_workers` (gauge): workers by state
//! - `proxy_worker_recycles_total` (counter): by whether the drain was forced

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection(outcome: &'static str, accepted_at: Instant) {
    counter!("proxy_connections_total", "outcome" => outcome).increment(1);
    histogram!("proxy_request_duration_seconds").record(accepted_at.elapsed().as_secs_f64());
}

pub fn record_bytes(direction: &'static str, bytes: u64) {
    counter!("proxy_bytes_relayed_total", "direction" => direction).increment(bytes);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_worker_states(active: usize, draining: usize) {
    gauge!("proxy_workers", "state" => "active").set(active as f64);
    gauge!("proxy_workers", "state" => "draining").set(draining as f64);
}

pub fn record_worker_recycled(forced: bool) {
    let forced = if forced { "true" } else { "false" };
    counter!("proxy_worker_recycles_total", "forced" => forced).increment(1);
}
