//! Accept loop and per-connection execution.
//!
//! # Responsibilities
//! - Accept connections from a listener without ever waiting on running connections
//! - Assign each connection a dispatch id and register it
//! - Run the application pipeline and contain its failures
//! - Complete streams, wait for transport close and tear down on every exit path
//!
//! # Design Decisions
//! - One detached task per connection; the accept loop never awaits them
//! - Only fatal accept errors (or a closed listener) end the accept loop;
//!   retryable ones back off and keep accepting
//! - Stream completion and teardown are drop guards, so they also run when a
//!   connection task is cancelled

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, Span};

use crate::dispatch::{ConnectionRegistry, ServiceContext};
use crate::net::closed::wait_for_closed;
use crate::net::connection::{ConnectionId, ConnectionRecord, ConnectionState};
use crate::net::listener::{AcceptError, ConnectionListener};
use crate::net::transport::TransportConnection;
use crate::observability::metrics;
use crate::pipeline::{ConnectionDelegate, PipelineFault};
use crate::resilience::backoff::Backoff;

const COMPONENT: &str = "Dispatcher";

/// Drives accepted connections through their lifecycle.
pub struct Dispatcher {
    context: Arc<ServiceContext>,
    delegate: Arc<dyn ConnectionDelegate>,
    /// Last assigned dispatch id. Relaxed ordering is enough: ids only need
    /// to be unique and increasing, which a single fetch_add guarantees.
    last_connection_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(context: Arc<ServiceContext>, delegate: Arc<dyn ConnectionDelegate>) -> Self {
        Self {
            context,
            delegate,
            last_connection_id: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.context.registry
    }

    /// Start the accept loop on a background task and return immediately.
    ///
    /// The returned handle resolves once the listener reports a fatal error
    /// or is closed. Connections already running are unaffected.
    pub fn start_accepting_connections<L>(self: &Arc<Self>, listener: L) -> JoinHandle<()>
    where
        L: ConnectionListener,
    {
        tokio::spawn(Arc::clone(self).accept_connections(listener))
    }

    async fn accept_connections<L>(self: Arc<Self>, mut listener: L)
    where
        L: ConnectionListener,
    {
        let mut backoff = Backoff::new(
            self.context.accept.retry_base_delay_ms,
            self.context.accept.retry_max_delay_ms,
        );

        loop {
            match listener.accept().await {
                Ok(connection) => {
                    backoff.reset();
                    let dispatcher = Arc::clone(&self);
                    tokio::spawn(async move { dispatcher.on_connection(connection).await });
                }
                Err(e) if !e.is_fatal() => {
                    metrics::record_accept_error(e.kind());
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = backoff.failures(),
                        delay = ?delay,
                        "Accept failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AcceptError::Closed) => {
                    tracing::info!("Listener closed, accept loop stopped");
                    break;
                }
                Err(e) => {
                    metrics::record_accept_error(e.kind());
                    tracing::error!(error = %e, "Accept loop stopped");
                    break;
                }
            }
        }
    }

    /// Execute one connection. The transport is released when this returns
    /// and the pipeline has dropped its reference.
    async fn on_connection(self: Arc<Self>, transport: Arc<dyn TransportConnection>) {
        self.execute(transport).await;
    }

    async fn execute(&self, transport: Arc<dyn TransportConnection>) {
        let id = ConnectionId::new(self.last_connection_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = Arc::new(ConnectionRecord::new(id, transport));

        self.context.registry.add(id, Arc::clone(&record));
        let teardown = Teardown::new(&self.context, &record);

        let connection_id = record.transport().connection_id();
        tracing::trace!(id = %id, connection_id = %connection_id, "Connection registered");
        self.context.trace.connection_start(connection_id);

        let scope = self.begin_connection_scope(connection_id);
        self.process(&record).instrument(scope).await;

        teardown.run().await;
    }

    async fn process(&self, record: &ConnectionRecord) {
        let transport = record.transport();
        {
            let _streams = CompleteStreams(transport.as_ref());

            let invocation = AssertUnwindSafe(self.delegate.on_connection(Arc::clone(transport)))
                .catch_unwind()
                .await;
            let fault = match invocation {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(PipelineFault::Failed(e)),
                Err(payload) => Some(PipelineFault::from_panic(payload)),
            };
            if let Some(fault) = fault {
                self.context
                    .trace
                    .log_critical(COMPONENT, "execute", transport.connection_id(), &fault);
            }
        }
        record.set_state(ConnectionState::Draining);

        wait_for_closed(transport.connection_closed()).await;
    }

    fn begin_connection_scope(&self, connection_id: &str) -> Span {
        if self.context.trace.is_enabled(Level::ERROR) {
            self.context.trace.begin_scope(connection_id)
        } else {
            Span::none()
        }
    }
}

/// Completes both application streams when dropped.
struct CompleteStreams<'a>(&'a dyn TransportConnection);

impl Drop for CompleteStreams<'_> {
    fn drop(&mut self) {
        self.0.complete_input();
        self.0.complete_output();
    }
}

/// Final teardown of a registered connection. Runs exactly once: through
/// `run` on the normal path, or from `Drop` if the task is cancelled.
struct Teardown<'a> {
    context: &'a ServiceContext,
    record: &'a Arc<ConnectionRecord>,
    transport_completing: bool,
    finished: bool,
}

impl<'a> Teardown<'a> {
    fn new(context: &'a ServiceContext, record: &'a Arc<ConnectionRecord>) -> Self {
        Self {
            context,
            record,
            transport_completing: false,
            finished: false,
        }
    }

    async fn run(mut self) {
        self.transport_completing = true;
        self.record.transport().complete().await;
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.context
            .trace
            .connection_stop(self.record.transport().connection_id());
        self.record.set_state(ConnectionState::Closed);
        self.context.registry.remove(self.record.id());
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.transport_completing {
            let transport = Arc::clone(self.record.transport());
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { transport.complete().await });
                }
                Err(_) => tracing::warn!(
                    connection_id = %transport.connection_id(),
                    "Connection cancelled outside a runtime; transport not completed"
                ),
            }
        }
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory::{ClosePolicy, MemoryListener, MemoryTransport};
    use crate::net::pipe::PipeOptions;
    use crate::observability::TracingConnectionTrace;
    use crate::pipeline::BoxError;
    use std::sync::Mutex;
    use std::time::Duration;

    fn dispatcher(delegate: Arc<dyn ConnectionDelegate>) -> Arc<Dispatcher> {
        let context = Arc::new(ServiceContext::new(Arc::new(TracingConnectionTrace)));
        Arc::new(Dispatcher::new(context, delegate))
    }

    fn recording_delegate(seen: Arc<Mutex<Vec<String>>>) -> Arc<dyn ConnectionDelegate> {
        Arc::new(move |connection: Arc<dyn TransportConnection>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(connection.connection_id().to_string());
                Ok::<(), BoxError>(())
            }
        })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn each_dispatcher_counts_from_one() {
        let first = dispatcher(recording_delegate(Arc::default()));
        let second = dispatcher(recording_delegate(Arc::default()));

        for d in [&first, &second] {
            let (transport, _peer) = MemoryTransport::new("mem", PipeOptions::default(), PipeOptions::default());
            Arc::clone(d).on_connection(transport).await;
        }

        assert_eq!(first.last_connection_id.load(Ordering::SeqCst), 1);
        assert_eq!(second.last_connection_id.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_accepting_returns_immediately_and_dispatches() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let d = dispatcher(recording_delegate(Arc::clone(&seen)));
        let (listener, connector) = MemoryListener::bind(d.context());

        let accept_loop = d.start_accepting_connections(listener);
        let peer = connector.connect("a");

        wait_until(|| seen.lock().unwrap().len() == 1).await;
        wait_until(|| peer.is_disposed()).await;
        assert_eq!(peer.complete_calls(), 1);
        assert!(d.registry().is_empty());

        drop(connector);
        accept_loop.await.unwrap();
    }

    #[tokio::test]
    async fn waits_for_transport_close_before_teardown() {
        let d = dispatcher(recording_delegate(Arc::default()));
        let (transport, peer) = MemoryTransport::with_close_policy(
            "held",
            PipeOptions::default(),
            PipeOptions::default(),
            ClosePolicy::HoldOpen,
        );

        let task = tokio::spawn(Arc::clone(&d).on_connection(transport));
        wait_until(|| {
            d.registry()
                .get(ConnectionId::new(1))
                .is_some_and(|r| r.state() == ConnectionState::Draining)
        })
        .await;
        assert_eq!(peer.complete_calls(), 0);

        peer.close();
        task.await.unwrap();
        assert_eq!(peer.complete_calls(), 1);
        assert!(d.registry().is_empty());
    }

    #[tokio::test]
    async fn cancelled_connection_still_tears_down() {
        let started = Arc::new(tokio::sync::Notify::new());
        let delegate: Arc<dyn ConnectionDelegate> = Arc::new({
            let started = Arc::clone(&started);
            move |_connection: Arc<dyn TransportConnection>| {
                let started = Arc::clone(&started);
                async move {
                    started.notify_one();
                    std::future::pending::<()>().await;
                    Ok::<(), BoxError>(())
                }
            }
        });
        let d = dispatcher(delegate);
        let (transport, peer) = MemoryTransport::with_close_policy(
            "cancelled",
            PipeOptions::default(),
            PipeOptions::default(),
            ClosePolicy::HoldOpen,
        );

        let task = tokio::spawn(Arc::clone(&d).on_connection(transport));
        started.notified().await;
        assert_eq!(d.registry().len(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert!(d.registry().is_empty());
        wait_until(|| peer.complete_calls() == 1).await;
        wait_until(|| peer.is_disposed()).await;
    }
}
