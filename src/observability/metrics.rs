//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): finished sessions by outcome
//! - `proxy_active_sessions` (gauge): sessions currently relaying
//! - `proxy_session_duration_seconds` (histogram): session lifetime
//! - `proxy_bytes_total` (counter): relayed bytes by direction
//! - `proxy_backend_active_connections` (gauge): per-backend load
//! - `proxy_backend_health` (gauge): 1=healthy, 0=unhealthy/draining
//! - `proxy_health_transitions_total` (counter): probe-driven state changes
//! - `proxy_tls_handshake_failures_total` (counter)
//! - `proxy_upstream_connect_failures_total` (counter): per-backend
//!
//! Without an installed recorder every call is a no-op, so library code and
//! tests can record unconditionally.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::load_balancer::backend::HealthState;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session(outcome: &'static str, duration: Duration, to_backend: u64, to_client: u64) {
    counter!("proxy_connections_total", "outcome" => outcome).increment(1);
    histogram!("proxy_session_duration_seconds").record(duration.as_secs_f64());
    counter!("proxy_bytes_total", "direction" => "to_backend").increment(to_backend);
    counter!("proxy_bytes_total", "direction" => "to_client").increment(to_client);
}

pub fn record_active_sessions(count: u64) {
    gauge!("proxy_active_sessions").set(count as f64);
}

pub fn record_backend_load(backend: &str, active: usize) {
    gauge!("proxy_backend_active_connections", "backend" => backend.to_string()).set(active as f64);
}

pub fn record_backend_health(backend: &str, state: HealthState) {
    let value = if state == HealthState::Healthy { 1.0 } else { 0.0 };
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(value);
}

pub fn record_health_transition(backend: &str, to: HealthState) {
    counter!(
        "proxy_health_transitions_total",
        "backend" => backend.to_string(),
        "state" => to.to_string()
    )
    .increment(1);
}

pub fn record_tls_handshake_failure() {
    counter!("proxy_tls_handshake_failures_total").increment(1);
}

pub fn record_upstream_connect_failure(backend: &str) {
    counter!("proxy_upstream_connect_failures_total", "backend" => backend.to_string()).increment(1);
}
