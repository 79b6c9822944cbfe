//! Transport closed notification.
//!
//! A `ClosedSignal` fires once when the transport reports the connection
//! physically closed. Any number of tasks may wait on it.

use tokio_util::sync::CancellationToken;

/// One-shot, multi-waiter close notification.
#[derive(Debug, Clone, Default)]
pub struct ClosedSignal {
    token: CancellationToken,
}

impl ClosedSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Subsequent calls are no-ops.
    pub fn fire(&self) {
        self.token.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Wait until `signal` fires.
///
/// Completes on first poll when the signal has already fired; otherwise
/// registers a single waiter that is woken exactly once.
pub async fn wait_for_closed(signal: &ClosedSignal) {
    if signal.is_fired() {
        return;
    }
    signal.token.cancelled().await;
}
