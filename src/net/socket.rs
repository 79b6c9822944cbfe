//! TCP transport connection.
//!
//! # Responsibilities
//! - Pump socket reads into the inbound pipe (respecting its backpressure)
//! - Pump the outbound pipe into the socket
//! - Fire the closed signal once both pumps have stopped
//!
//! # Design Decisions
//! - Pumps run on the schedulers carried by the pipe options
//! - Completing a pipe from the application side stops the matching pump
//! - Every pump await also races the close request, so `request_close` works
//!   even against a peer that stopped reading
//! - Dropping the transport requests close so pumps release the socket halves

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::net::closed::ClosedSignal;
use crate::net::listener::ConnectionPermit;
use crate::net::pipe::{pipe, BufferPool, PipeOptions, PipeReader, PipeWriter};
use crate::net::transport::TransportConnection;

/// A transport connection over a TCP stream.
pub struct SocketTransport {
    connection_id: String,
    input: PipeReader,
    output: PipeWriter,
    closed: ClosedSignal,
    close_requested: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    _permit: Option<ConnectionPermit>,
}

impl SocketTransport {
    /// Wrap `stream` and start its pumps.
    pub fn start(
        stream: TcpStream,
        input_options: PipeOptions,
        output_options: PipeOptions,
        permit: Option<ConnectionPermit>,
    ) -> Arc<Self> {
        let connection_id = Uuid::new_v4().simple().to_string();
        let (input_writer, input_reader) = pipe(input_options.clone());
        let (output_writer, output_reader) = pipe(output_options.clone());
        let (read_half, write_half) = stream.into_split();
        let closed = ClosedSignal::new();
        let close_requested = CancellationToken::new();

        let receive = input_options.writer_scheduler.spawn(receive_loop(
            read_half,
            input_writer,
            input_options.pool,
            close_requested.clone(),
            connection_id.clone(),
        ));
        let send = output_options.reader_scheduler.spawn(send_loop(
            write_half,
            output_reader,
            close_requested.clone(),
            connection_id.clone(),
        ));

        let supervisor = tokio::spawn({
            let closed = closed.clone();
            let connection_id = connection_id.clone();
            async move {
                if let Err(e) = receive.await {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Receive pump failed");
                }
                if let Err(e) = send.await {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Send pump failed");
                }
                closed.fire();
                tracing::trace!(connection_id = %connection_id, "Transport closed");
            }
        });

        Arc::new(Self {
            connection_id,
            input: input_reader,
            output: output_writer,
            closed,
            close_requested,
            supervisor: Mutex::new(Some(supervisor)),
            _permit: permit,
        })
    }
}

#[async_trait]
impl TransportConnection for SocketTransport {
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
        &self.closed
    }

    fn request_close(&self) {
        self.close_requested.cancel();
    }

    async fn complete(&self) {
        self.close_requested.cancel();
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "Transport supervisor failed");
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close_requested.cancel();
    }
}

async fn receive_loop(
    mut socket: OwnedReadHalf,
    input: PipeWriter,
    pool: BufferPool,
    close_requested: CancellationToken,
    connection_id: String,
) {
    let application_done = input.reader_completion();
    loop {
        let mut buffer = pool.rent();
        let read = tokio::select! {
            _ = close_requested.cancelled() => break,
            _ = application_done.cancelled() => break,
            read = socket.read_buf(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                tracing::trace!(connection_id = %connection_id, "Peer finished sending");
                break;
            }
            Ok(_) => {
                let flush = tokio::select! {
                    _ = close_requested.cancelled() => break,
                    flush = input.write(&buffer) => flush,
                };
                match flush {
                    Ok(flush) if !flush.is_completed => {}
                    _ => break,
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket read failed");
                break;
            }
        }
    }
    input.complete();
}

async fn send_loop(
    mut socket: OwnedWriteHalf,
    output: PipeReader,
    close_requested: CancellationToken,
    connection_id: String,
) {
    loop {
        let read = tokio::select! {
            _ = close_requested.cancelled() => break,
            read = output.read() => read,
        };
        let Ok(result) = read else { break };

        if !result.buffer.is_empty() {
            // A peer that stops reading must not keep the pump from seeing a close request.
            let written = tokio::select! {
                _ = close_requested.cancelled() => break,
                written = socket.write_all(&result.buffer) => written,
            };
            if let Err(e) = written {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket write failed");
                break;
            }
        }
        if result.is_completed {
            break;
        }
    }
    if let Err(e) = socket.shutdown().await {
        tracing::trace!(connection_id = %connection_id, error = %e, "Socket shutdown failed");
    }
    output.complete();
}
