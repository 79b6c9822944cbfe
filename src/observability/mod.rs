//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher / accept loop / heartbeat produce:
//!     → trace.rs (connection start/stop, critical faults, per-connection scope)
//!     → metrics.rs (counters, gauges)
//!     → logging.rs (subscriber setup for the binary)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - The dispatcher only talks to the `ConnectionTrace` trait, so tests can record events
//! - Transport connection id flows through every connection event
//! - Metrics are cheap (atomic increments)
//! - Per-connection spans are only built when critical-level logging is enabled

pub mod logging;
pub mod metrics;
pub mod trace;

pub use trace::{ConnectionTrace, TracingConnectionTrace};
