//! Connection-level observability events.

use tracing::{Level, Span};

use crate::observability::metrics;

/// Observability collaborator used by the dispatcher.
pub trait ConnectionTrace: Send + Sync + 'static {
    fn connection_start(&self, connection_id: &str);

    fn connection_stop(&self, connection_id: &str);

    /// Report a fault at critical severity, naming the component and step it came from.
    fn log_critical(
        &self,
        component: &'static str,
        step: &'static str,
        connection_id: &str,
        fault: &(dyn std::error::Error + 'static),
    );

    fn is_enabled(&self, level: Level) -> bool;

    /// Logging scope covering one connection's processing.
    fn begin_scope(&self, connection_id: &str) -> Span;
}

/// `ConnectionTrace` backed by `tracing` events and `metrics` counters.
///
/// Critical severity maps to `Level::ERROR` with `severity = "critical"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConnectionTrace;

impl ConnectionTrace for TracingConnectionTrace {
    fn connection_start(&self, connection_id: &str) {
        tracing::debug!(connection_id = %connection_id, "Connection start");
        metrics::record_connection_start();
    }

    fn connection_stop(&self, connection_id: &str) {
        tracing::debug!(connection_id = %connection_id, "Connection stop");
        metrics::record_connection_stop();
    }

    fn log_critical(
        &self,
        component: &'static str,
        step: &'static str,
        connection_id: &str,
        fault: &(dyn std::error::Error + 'static),
    ) {
        tracing::error!(
            severity = "critical",
            component,
            step,
            connection_id = %connection_id,
            error = fault,
            "{component}.{step}() {connection_id}"
        );
        metrics::record_pipeline_fault();
    }

    fn is_enabled(&self, level: Level) -> bool {
        match level {
            Level::ERROR => tracing::enabled!(Level::ERROR),
            Level::WARN => tracing::enabled!(Level::WARN),
            Level::INFO => tracing::enabled!(Level::INFO),
            Level::DEBUG => tracing::enabled!(Level::DEBUG),
            _ => tracing::enabled!(Level::TRACE),
        }
    }

    fn begin_scope(&self, connection_id: &str) -> Span {
        tracing::error_span!("connection", connection_id = %connection_id)
    }
}
