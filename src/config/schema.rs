//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the dispatch server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, admission limit).
    pub listener: ListenerConfig,

    /// Per-connection stream buffering limits.
    pub limits: LimitsConfig,

    /// Buffer pool settings.
    pub buffers: BufferConfig,

    /// Accept loop retry behaviour.
    pub accept: AcceptConfig,

    /// Idle-timeout sweep.
    pub heartbeat: HeartbeatConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections admitted by the listener. Unset = no cap.
    pub max_connections: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: None,
        }
    }
}

/// A byte-size ceiling that may be explicitly unlimited.
///
/// Written in TOML as an integer byte count or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "RawBufferLimit", into = "RawBufferLimit")]
pub enum BufferLimit {
    Unlimited,
    Bytes(u64),
}

impl BufferLimit {
    /// `None` when unlimited.
    pub fn as_option(self) -> Option<u64> {
        match self {
            BufferLimit::Unlimited => None,
            BufferLimit::Bytes(n) => Some(n),
        }
    }
}

impl From<Option<u64>> for BufferLimit {
    fn from(limit: Option<u64>) -> Self {
        limit.map_or(BufferLimit::Unlimited, BufferLimit::Bytes)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum RawBufferLimit {
    Bytes(u64),
    Keyword(String),
}

impl TryFrom<RawBufferLimit> for BufferLimit {
    type Error = String;

    fn try_from(raw: RawBufferLimit) -> Result<Self, Self::Error> {
        match raw {
            RawBufferLimit::Bytes(n) => Ok(BufferLimit::Bytes(n)),
            RawBufferLimit::Keyword(s) if s.eq_ignore_ascii_case("unlimited") => {
                Ok(BufferLimit::Unlimited)
            }
            RawBufferLimit::Keyword(s) => Err(format!(
                "invalid buffer limit {s:?}: expected a byte count or \"unlimited\""
            )),
        }
    }
}

impl From<BufferLimit> for RawBufferLimit {
    fn from(limit: BufferLimit) -> Self {
        match limit {
            BufferLimit::Unlimited => RawBufferLimit::Keyword("unlimited".to_string()),
            BufferLimit::Bytes(n) => RawBufferLimit::Bytes(n),
        }
    }
}

/// Stream buffering limits applied to every connection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Inbound bytes buffered before the transport stops reading.
    pub max_request_buffer_size: BufferLimit,

    /// Outbound bytes buffered before application writes wait.
    pub max_response_buffer_size: BufferLimit,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_buffer_size: BufferLimit::Bytes(1024 * 1024), // 1MB
            max_response_buffer_size: BufferLimit::Bytes(64 * 1024),  // 64KB
        }
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of each socket read segment in bytes.
    pub minimum_segment_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            minimum_segment_size: 4096,
        }
    }
}

/// Accept loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcceptConfig {
    /// Base delay after a retryable accept failure, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay between accept retries, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for AcceptConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 1000,
        }
    }
}

/// Idle-timeout sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Enable the idle sweep.
    pub enabled: bool,

    /// Sweep interval in milliseconds.
    pub interval_ms: u64,

    /// Close connections idle for longer than this, in seconds.
    pub keep_alive_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
            keep_alive_timeout_secs: 130,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for connections to drain before forcing them closed.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
