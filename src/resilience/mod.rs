//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Retryable accept failure:
//!     → backoff.rs (exponential delay with jitter)
//!     → accept loop sleeps, then accepts again
//!     → first successful accept resets the backoff
//! ```

pub mod backoff;
