//! Transport connection contract consumed by the dispatcher.

use std::time::Instant;

use async_trait::async_trait;

use crate::net::closed::ClosedSignal;
use crate::net::pipe::{PipeReader, PipeWriter};

/// An accepted, bidirectional byte-stream connection.
///
/// Implementations release transport-owned resources (sockets, pump tasks,
/// admission permits) in `Drop`, which runs once the dispatcher and the
/// pipeline have let go of the connection.
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    /// Stable identifier used for log correlation.
    fn connection_id(&self) -> &str;

    /// Application side of the inbound stream.
    fn input(&self) -> &PipeReader;

    /// Application side of the outbound stream.
    fn output(&self) -> &PipeWriter;

    /// Mark the inbound stream complete. Returns `true` on the first call.
    fn complete_input(&self) -> bool {
        self.input().complete()
    }

    /// Mark the outbound stream complete. Returns `true` on the first call.
    fn complete_output(&self) -> bool {
        self.output().complete()
    }

    /// Fires once the transport has physically closed.
    fn connection_closed(&self) -> &ClosedSignal;

    /// Most recent read or write on either stream.
    fn last_activity(&self) -> Instant {
        self.input().last_activity().max(self.output().last_activity())
    }

    /// Ask the transport to close. Observed through `connection_closed`.
    fn request_close(&self);

    /// Final transport shutdown. Called exactly once, after processing ends.
    async fn complete(&self);
}
