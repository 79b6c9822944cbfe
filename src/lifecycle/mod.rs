//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Heartbeat (heartbeat.rs):
//!     tick → walk registry → request_close on idle transports
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Force close → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Registry consumers only enumerate; closing goes through the transport
//! - Shutdown has timeout: remaining connections are force-closed after the deadline

pub mod heartbeat;
pub mod shutdown;
pub mod signals;

pub use heartbeat::Heartbeat;
pub use shutdown::Shutdown;
