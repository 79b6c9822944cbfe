//! In-memory transport and listener.
//!
//! # Responsibilities
//! - Provide a transport connection without sockets (embedding, tests)
//! - Expose the client side as a `MemoryPeer`
//! - Feed connections (or injected accept failures) to the dispatcher through `MemoryListener`
//!
//! # Design Decisions
//! - Closing mirrors the socket transport: once the application completes both
//!   streams the transport closes, unless the connection is held open
//! - Peer close and `request_close` abort both directions; `complete` keeps
//!   unread output available to the peer

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dispatch::pipe_options::{input_pipe_options, output_pipe_options};
use crate::dispatch::ServiceContext;
use crate::net::closed::{wait_for_closed, ClosedSignal};
use crate::net::listener::{AcceptError, ConnectionListener};
use crate::net::pipe::{pipe, FlushResult, PipeError, PipeOptions, PipeReader, PipeScheduler, PipeWriter, ReadResult};
use crate::net::transport::TransportConnection;

/// When an in-memory transport reports itself closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Close once the application has completed both streams.
    OnApplicationComplete,
    /// Close only on peer close, `request_close`, or `complete`.
    HoldOpen,
}

/// Peer-side pipe ends, shared so either side can abort the connection.
struct Wire {
    to_server: PipeWriter,
    from_server: PipeReader,
    closed: ClosedSignal,
}

impl Wire {
    fn abort(&self) {
        self.to_server.complete();
        self.from_server.complete();
        self.closed.fire();
    }

    /// Close without discarding output the peer has not read yet.
    fn finish(&self) {
        self.to_server.complete();
        self.closed.fire();
    }
}

/// Server side of an in-memory connection.
pub struct MemoryTransport {
    connection_id: String,
    input: PipeReader,
    output: PipeWriter,
    wire: Arc<Wire>,
    complete_calls: Arc<AtomicUsize>,
    disposed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a connection that closes once the application completes both streams.
    pub fn new(
        connection_id: impl Into<String>,
        input_options: PipeOptions,
        output_options: PipeOptions,
    ) -> (Arc<Self>, MemoryPeer) {
        Self::with_close_policy(
            connection_id,
            input_options,
            output_options,
            ClosePolicy::OnApplicationComplete,
        )
    }

    pub fn with_close_policy(
        connection_id: impl Into<String>,
        input_options: PipeOptions,
        output_options: PipeOptions,
        policy: ClosePolicy,
    ) -> (Arc<Self>, MemoryPeer) {
        let connection_id = connection_id.into();
        let (to_server, input) = pipe(input_options);
        let (output, from_server) = pipe(output_options);
        let wire = Arc::new(Wire {
            to_server,
            from_server,
            closed: ClosedSignal::new(),
        });
        let complete_calls = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicBool::new(false));

        if policy == ClosePolicy::OnApplicationComplete {
            let input_done = input.completion();
            let output_done = output.completion();
            let closed = wire.closed.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = wait_for_closed(&closed) => {}
                    _ = async {
                        input_done.cancelled().await;
                        output_done.cancelled().await;
                        closed.fire();
                    } => {}
                }
            });
        }

        let peer = MemoryPeer {
            connection_id: connection_id.clone(),
            wire: Arc::clone(&wire),
            complete_calls: Arc::clone(&complete_calls),
            disposed: Arc::clone(&disposed),
        };
        let transport = Arc::new(Self {
            connection_id,
            input,
            output,
            wire,
            complete_calls,
            disposed,
        });
        (transport, peer)
    }
}

#[async_trait]
impl TransportConnection for MemoryTransport {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn input(&self) -> &PipeReader {
        &self.input
    }

    fn output(&self) -> &PipeWriter {
        &self.output
    }

    fn connection_closed(&self) -> &ClosedSignal {
        &self.wire.closed
    }

    fn request_close(&self) {
        self.wire.abort();
    }

    async fn complete(&self) {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.wire.finish();
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.wire.closed.fire();
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    connection_id: String,
    wire: Arc<Wire>,
    complete_calls: Arc<AtomicUsize>,
    disposed: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Send bytes to the application.
    pub async fn send(&self, data: &[u8]) -> Result<FlushResult, PipeError> {
        self.wire.to_server.write(data).await
    }

    /// Signal EOF to the application.
    pub fn finish_sending(&self) {
        self.wire.to_server.complete();
    }

    /// Receive whatever the application has written so far.
    pub async fn receive(&self) -> Result<ReadResult, PipeError> {
        self.wire.from_server.read().await
    }

    /// Receive until the application completes its output.
    pub async fn receive_to_end(&self) -> Vec<u8> {
        let mut received = Vec::new();
        while let Ok(read) = self.wire.from_server.read().await {
            received.extend_from_slice(&read.buffer);
            if read.is_completed {
                break;
            }
        }
        received
    }

    /// Abort the connection from the client side.
    pub fn close(&self) {
        self.wire.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.wire.closed.is_fired()
    }

    /// Number of times the transport's `complete` ran.
    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Whether the server side has been dropped.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

type Incoming = Result<Arc<dyn TransportConnection>, AcceptError>;

/// Listener yielding in-memory connections pushed through a `MemoryConnector`.
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl MemoryListener {
    /// Create a listener whose connections use the context's backpressure limits.
    pub fn bind(context: &ServiceContext) -> (Self, MemoryConnector) {
        let (tx, incoming) = mpsc::unbounded_channel();
        let connector = MemoryConnector {
            tx,
            input_options: input_pipe_options(context, &context.pool, PipeScheduler::Current),
            output_options: output_pipe_options(context, &context.pool, PipeScheduler::Current),
        };
        (Self { incoming }, connector)
    }
}

#[async_trait]
impl ConnectionListener for MemoryListener {
    async fn accept(&mut self) -> Result<Arc<dyn TransportConnection>, AcceptError> {
        match self.incoming.recv().await {
            Some(incoming) => incoming,
            None => Err(AcceptError::Closed),
        }
    }
}

/// Client handle for a `MemoryListener`. Dropping every connector closes the listener.
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<Incoming>,
    input_options: PipeOptions,
    output_options: PipeOptions,
}

impl MemoryConnector {
    /// Open a connection that closes once the application is done with it.
    pub fn connect(&self, connection_id: impl Into<String>) -> MemoryPeer {
        self.connect_with_policy(connection_id, ClosePolicy::OnApplicationComplete)
    }

    pub fn connect_with_policy(
        &self,
        connection_id: impl Into<String>,
        policy: ClosePolicy,
    ) -> MemoryPeer {
        let (transport, peer) = MemoryTransport::with_close_policy(
            connection_id,
            self.input_options.clone(),
            self.output_options.clone(),
            policy,
        );
        if self.tx.send(Ok(transport)).is_err() {
            tracing::debug!(connection_id = %peer.connection_id(), "Memory listener gone; connection dropped");
        }
        peer
    }

    /// Make the next pending `accept` fail with `error`.
    pub fn fail(&self, error: AcceptError) {
        if let Err(mpsc::error::SendError(rejected)) = self.tx.send(Err(error)) {
            tracing::debug!(
                error = ?rejected.err(),
                "Memory listener gone; injected accept error dropped"
            );
        }
    }
}
