//! Listener contract and the TCP listener implementation.
//!
//! # Responsibilities
//! - Define the accept contract used by the dispatcher's accept loop
//! - Distinguish fatal accept failures from retryable ones
//! - Bind to the configured address and accept TCP connections
//! - Optionally cap concurrent connections via semaphore (admission control)

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

use crate::config::ListenerConfig;
use crate::dispatch::pipe_options::{input_pipe_options, output_pipe_options};
use crate::dispatch::ServiceContext;
use crate::net::pipe::PipeOptions;
use crate::net::socket::SocketTransport;
use crate::net::transport::TransportConnection;

/// Why `accept` did not produce a connection.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The listener was shut down deliberately.
    #[error("listener closed")]
    Closed,

    /// The listener cannot accept any more connections.
    #[error("fatal accept error: {0}")]
    Fatal(#[source] io::Error),

    /// A transient failure; the next accept may succeed.
    #[error("transient accept error: {0}")]
    Retryable(#[source] io::Error),
}

impl AcceptError {
    /// Whether the accept loop must stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AcceptError::Retryable(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AcceptError::Closed => "closed",
            AcceptError::Fatal(_) => "fatal",
            AcceptError::Retryable(_) => "retryable",
        }
    }
}

/// Classify an I/O error returned by `accept(2)`.
///
/// Per-connection failures and resource exhaustion are retryable; anything
/// else means the listening socket itself is unusable.
pub fn classify_accept_error(error: io::Error) -> AcceptError {
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    const ENOBUFS: i32 = 105;
    const ENOMEM: i32 = 12;

    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptError::Retryable(error),
        _ => match error.raw_os_error() {
            Some(EMFILE | ENFILE | ENOBUFS | ENOMEM) => AcceptError::Retryable(error),
            _ => AcceptError::Fatal(error),
        },
    }
}

/// Source of accepted transport connections.
#[async_trait]
pub trait ConnectionListener: Send + 'static {
    /// Wait for the next connection.
    async fn accept(&mut self) -> Result<Arc<dyn TransportConnection>, AcceptError>;
}

/// A TCP listener producing `SocketTransport` connections.
pub struct TcpConnectionListener {
    inner: TcpListener,
    input_options: PipeOptions,
    output_options: PipeOptions,
    connection_limit: Option<Arc<Semaphore>>,
    shutdown: broadcast::Receiver<()>,
    closed: bool,
}

impl TcpConnectionListener {
    /// Bind to the configured address.
    ///
    /// `accept` returns `AcceptError::Closed` once `shutdown` fires.
    pub async fn bind(
        config: &ListenerConfig,
        context: &ServiceContext,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<Self> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;

        tracing::info!(
            address = %local_addr,
            max_connections = ?config.max_connections,
            "Listener bound"
        );

        let transport_scheduler = context.scheduler.clone();
        Ok(Self {
            inner,
            input_options: input_pipe_options(context, &context.pool, transport_scheduler.clone()),
            output_options: output_pipe_options(context, &context.pool, transport_scheduler),
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            shutdown,
            closed: false,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Available connection slots, if a limit is configured.
    pub fn available_permits(&self) -> Option<usize> {
        self.connection_limit
            .as_ref()
            .map(|limit| limit.available_permits())
    }
}

#[async_trait]
impl ConnectionListener for TcpConnectionListener {
    async fn accept(&mut self) -> Result<Arc<dyn TransportConnection>, AcceptError> {
        if self.closed {
            return Err(AcceptError::Closed);
        }

        let Self {
            inner,
            input_options,
            output_options,
            connection_limit,
            shutdown,
            closed,
        } = self;

        tokio::select! {
            _ = shutdown.recv() => {
                *closed = true;
                tracing::info!("Listener received shutdown signal");
                Err(AcceptError::Closed)
            }
            accepted = accept_socket(inner, input_options, output_options, connection_limit.as_ref()) => accepted,
        }
    }
}

async fn accept_socket(
    listener: &TcpListener,
    input_options: &PipeOptions,
    output_options: &PipeOptions,
    connection_limit: Option<&Arc<Semaphore>>,
) -> Result<Arc<dyn TransportConnection>, AcceptError> {
    // Acquire permit first (backpressure)
    let permit = match connection_limit {
        Some(limit) => Some(ConnectionPermit {
            _permit: Arc::clone(limit)
                .acquire_owned()
                .await
                .map_err(|_| AcceptError::Closed)?,
        }),
        None => None,
    };

    let (stream, peer_addr) = listener.accept().await.map_err(classify_accept_error)?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let transport = SocketTransport::start(
        stream,
        input_options.clone(),
        output_options.clone(),
        permit,
    );

    tracing::debug!(
        peer_addr = %peer_addr,
        connection_id = %transport.connection_id(),
        available_permits = ?connection_limit.map(|limit| limit.available_permits()),
        "Connection accepted"
    );

    Ok(transport)
}

/// A permit representing a connection slot.
///
/// Held by the transport; the slot is released when the transport is dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
