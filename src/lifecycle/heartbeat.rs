//! Idle-timeout sweep over the connection registry.
//!
//! # Responsibilities
//! - Periodically walk registered connections
//! - Ask transports idle past the keep-alive timeout to close
//!
//! The dispatcher observes the close through the transport's closed signal
//! and tears the connection down itself; the heartbeat never touches the
//! registry mapping.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HeartbeatConfig;
use crate::dispatch::ConnectionRegistry;
use crate::observability::metrics;

pub struct Heartbeat {
    registry: ConnectionRegistry,
    interval: Duration,
    keep_alive_timeout: Duration,
}

impl Heartbeat {
    pub fn new(registry: ConnectionRegistry, interval: Duration, keep_alive_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            keep_alive_timeout,
        }
    }

    pub fn from_config(registry: ConnectionRegistry, config: &HeartbeatConfig) -> Self {
        Self::new(
            registry,
            Duration::from_millis(config.interval_ms),
            Duration::from_secs(config.keep_alive_timeout_secs),
        )
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.interval,
            keep_alive_timeout = ?self.keep_alive_timeout,
            "Heartbeat starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_heartbeat(Instant::now());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Heartbeat received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Close every open connection idle since before `now - keep_alive_timeout`.
    /// Returns how many were asked to close.
    pub fn on_heartbeat(&self, now: Instant) -> usize {
        let mut closed = 0;
        self.registry.for_each(|record| {
            let transport = record.transport();
            if transport.connection_closed().is_fired() {
                return;
            }
            let idle = now.saturating_duration_since(transport.last_activity());
            if idle >= self.keep_alive_timeout {
                tracing::debug!(
                    connection_id = %transport.connection_id(),
                    id = %record.id(),
                    idle = ?idle,
                    "Closing idle connection"
                );
                transport.request_close();
                metrics::record_idle_close();
                closed += 1;
            }
        });
        closed
    }
}
