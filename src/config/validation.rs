//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, addresses parse, delays ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("accept.retry_base_delay_ms ({base}) exceeds accept.retry_max_delay_ms ({max})")]
    RetryDelayOrder { base: u64, max: u64 },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == Some(0) {
        errors.push(ValidationError::MustBePositive {
            field: "listener.max_connections",
        });
    }
    if config.buffers.minimum_segment_size == 0 {
        errors.push(ValidationError::MustBePositive {
            field: "buffers.minimum_segment_size",
        });
    }
    if config.accept.retry_base_delay_ms > config.accept.retry_max_delay_ms {
        errors.push(ValidationError::RetryDelayOrder {
            base: config.accept.retry_base_delay_ms,
            max: config.accept.retry_max_delay_ms,
        });
    }
    if config.heartbeat.enabled {
        if config.heartbeat.interval_ms == 0 {
            errors.push(ValidationError::MustBePositive {
                field: "heartbeat.interval_ms",
            });
        }
        if config.heartbeat.keep_alive_timeout_secs == 0 {
            errors.push(ValidationError::MustBePositive {
                field: "heartbeat.keep_alive_timeout_secs",
            });
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
