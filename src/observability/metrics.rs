//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_connections_total` (counter): connections that started execution
//! - `dispatch_active_connections` (gauge): connections between start and stop
//! - `dispatch_pipeline_faults_total` (counter): pipeline errors and panics
//! - `dispatch_accept_errors_total` (counter): accept failures by kind
//! - `dispatch_idle_closes_total` (counter): connections closed by the idle sweep

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_start() {
    metrics::counter!("dispatch_connections_total").increment(1);
    metrics::gauge!("dispatch_active_connections").increment(1.0);
}

pub fn record_connection_stop() {
    metrics::gauge!("dispatch_active_connections").decrement(1.0);
}

pub fn record_pipeline_fault() {
    metrics::counter!("dispatch_pipeline_faults_total").increment(1);
}

pub fn record_accept_error(kind: &'static str) {
    metrics::counter!("dispatch_accept_errors_total", "kind" => kind).increment(1);
}

pub fn record_idle_close() {
    metrics::counter!("dispatch_idle_closes_total").increment(1);
}
