//! Registry of live connections.
//!
//! # Responsibilities
//! - Map dispatch ids to their connection records while they are live
//! - Let registry consumers (idle sweep, diagnostics, shutdown) enumerate connections
//!
//! # Design Decisions
//! - Sharded locking (DashMap) so unrelated connections never serialize on one lock
//! - Only the dispatcher adds and removes; consumers get read-only enumeration
//! - A duplicate add or unmatched remove is a bug: logged and asserted, not recovered

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::net::connection::{ConnectionId, ConnectionRecord, ConnectionState};

/// Point-in-time view of one registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub connection_id: String,
    pub state: ConnectionState,
    pub age_ms: u64,
}

/// A thread-safe map of live connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<ConnectionId, Arc<ConnectionRecord>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Called once per id by the dispatcher.
    pub fn add(&self, id: ConnectionId, record: Arc<ConnectionRecord>) {
        if let Some(previous) = self.inner.insert(id, record) {
            tracing::error!(
                connection_id = %previous.transport().connection_id(),
                id = %id,
                "Connection id registered twice"
            );
            debug_assert!(false, "connection {id} registered twice");
        }
    }

    /// Deregister a connection. Called once per id by the dispatcher.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let removed = self.inner.remove(&id).map(|(_, record)| record);
        if removed.is_none() {
            tracing::error!(id = %id, "Removed a connection that was not registered");
            debug_assert!(false, "connection {id} removed without matching add");
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.inner.get(&id).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Visit every registered connection.
    ///
    /// `f` must not call back into `add`/`remove`.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<ConnectionRecord>),
    {
        for entry in self.inner.iter() {
            f(entry.value());
        }
    }

    /// Diagnostics view of all registered connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshot: Vec<_> = self
            .inner
            .iter()
            .map(|entry| {
                let record = entry.value();
                ConnectionSnapshot {
                    id: record.id(),
                    connection_id: record.transport().connection_id().to_string(),
                    state: record.state(),
                    age_ms: record.age().as_millis() as u64,
                }
            })
            .collect();
        snapshot.sort_by_key(|s| s.id);
        snapshot
    }

    /// Wait until every connection has been removed.
    pub async fn drain(&self, poll: Duration) {
        while !self.inner.is_empty() {
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.inner.len())
            .finish()
    }
}
