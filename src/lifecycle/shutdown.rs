//! Shutdown coordination for the server.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::dispatch::ConnectionRegistry;

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that the listener and the heartbeat subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for registered connections to finish, force-closing stragglers after `grace`.
///
/// Returns the number of connections that had to be force-closed.
pub async fn drain_connections(registry: &ConnectionRegistry, grace: Duration) -> usize {
    if tokio::time::timeout(grace, registry.drain(DRAIN_POLL)).await.is_ok() {
        return 0;
    }

    let mut forced = 0;
    registry.for_each(|record| {
        record.transport().request_close();
        forced += 1;
    });
    tracing::warn!(forced, "Drain timeout elapsed, closing remaining connections");

    registry.drain(DRAIN_POLL).await;
    forced
}
