//! Connection record and lifecycle state.
//!
//! # Responsibilities
//! - Carry the numeric dispatch id assigned at execution start
//! - Track connection state (Active → Draining → Closed)
//! - Hold the transport for the duration of the connection's execution

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::net::transport::TransportConnection;

/// Numeric dispatch id, unique per dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered; the pipeline owns the connection.
    Active = 0,
    /// Pipeline returned and streams are complete; waiting for transport close.
    Draining = 1,
    /// Transport torn down and removed from the registry.
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Active,
            1 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Lifecycle wrapper around one accepted transport connection.
pub struct ConnectionRecord {
    id: ConnectionId,
    transport: Arc<dyn TransportConnection>,
    state: AtomicU8,
    started_at: Instant,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, transport: Arc<dyn TransportConnection>) -> Self {
        Self {
            id,
            transport,
            state: AtomicU8::new(ConnectionState::Active as u8),
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> &Arc<dyn TransportConnection> {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Time since the record was created.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("connection_id", &self.transport.connection_id())
            .field("state", &self.state())
            .finish()
    }
}
