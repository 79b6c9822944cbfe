//! Connection lifecycle through the dispatcher, using in-memory transports.

mod common;

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common::{start_harness, wait_until, RecordingTrace, TraceEvent};
use conn_dispatch::dispatch::{Dispatcher, ServiceContext};
use conn_dispatch::net::listener::{AcceptError, ConnectionListener};
use conn_dispatch::net::memory::{ClosePolicy, MemoryTransport};
use conn_dispatch::net::pipe::{PipeOptions, PipeReader, PipeWriter};
use conn_dispatch::net::{ClosedSignal, ConnectionState, TransportConnection};
use conn_dispatch::pipeline::echo::EchoPipeline;
use conn_dispatch::pipeline::{BoxError, ConnectionDelegate};

/// Fails connections whose id is in `failing`; echoes the rest.
fn failing_for(failing: &'static [&'static str]) -> Arc<dyn ConnectionDelegate> {
    Arc::new(move |connection: Arc<dyn TransportConnection>| fail_or_echo(failing, connection))
}

async fn fail_or_echo(
    failing: &'static [&'static str],
    connection: Arc<dyn TransportConnection>,
) -> Result<(), BoxError> {
    if failing.iter().any(|id| *id == connection.connection_id()) {
        return Err(format!("rejected {}", connection.connection_id()).into());
    }
    let echo = EchoPipeline;
    echo.on_connection(connection).await
}

/// Reads inbound bytes until the peer finishes sending.
async fn drain_input(connection: Arc<dyn TransportConnection>) -> Result<(), BoxError> {
    loop {
        let read = connection.input().read().await?;
        if read.is_completed {
            return Ok(());
        }
    }
}

async fn panic_on_boom(connection: Arc<dyn TransportConnection>) -> Result<(), BoxError> {
    if connection.connection_id() == "boom" {
        panic!("pipeline exploded");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct CompletionCounts {
    input_calls: AtomicUsize,
    input_first: AtomicUsize,
    output_calls: AtomicUsize,
    output_first: AtomicUsize,
}

impl CompletionCounts {
    fn record(calls: &AtomicUsize, first: &AtomicUsize, was_first: bool) -> bool {
        calls.fetch_add(1, Ordering::SeqCst);
        if was_first {
            first.fetch_add(1, Ordering::SeqCst);
        }
        was_first
    }
}

/// Memory transport that counts stream completions.
struct CountingTransport {
    inner: Arc<MemoryTransport>,
    counts: Arc<CompletionCounts>,
}

#[async_trait]
impl TransportConnection for CountingTransport {
    fn connection_id(&self) -> &str {
        self.inner.connection_id()
    }

    fn input(&self) -> &PipeReader {
        self.inner.input()
    }

    fn output(&self) -> &PipeWriter {
        self.inner.output()
    }

    fn complete_input(&self) -> bool {
        let was_first = self.inner.complete_input();
        CompletionCounts::record(&self.counts.input_calls, &self.counts.input_first, was_first)
    }

    fn complete_output(&self) -> bool {
        let was_first = self.inner.complete_output();
        CompletionCounts::record(&self.counts.output_calls, &self.counts.output_first, was_first)
    }

    fn connection_closed(&self) -> &ClosedSignal {
        self.inner.connection_closed()
    }

    fn request_close(&self) {
        self.inner.request_close();
    }

    async fn complete(&self) {
        self.inner.complete().await;
    }
}

/// Listener fed from a channel of ready-made transports.
struct QueueListener(mpsc::UnboundedReceiver<Arc<dyn TransportConnection>>);

#[async_trait]
impl ConnectionListener for QueueListener {
    async fn accept(&mut self) -> Result<Arc<dyn TransportConnection>, AcceptError> {
        self.0.recv().await.ok_or(AcceptError::Closed)
    }
}

#[tokio::test]
async fn streams_complete_exactly_once_and_ids_increase() {
    let trace = Arc::new(RecordingTrace::default());
    let context = Arc::new(ServiceContext::new(trace.clone()));
    let dispatcher = Arc::new(Dispatcher::new(context, failing_for(&["second"])));
    let (tx, rx) = mpsc::unbounded_channel();
    let accept_loop = dispatcher.start_accepting_connections(QueueListener(rx));

    let mut connections = Vec::new();
    for name in ["first", "second", "third"] {
        let (inner, peer) = MemoryTransport::with_close_policy(
            name,
            PipeOptions::default(),
            PipeOptions::default(),
            ClosePolicy::HoldOpen,
        );
        let counts = Arc::new(CompletionCounts::default());
        let transport: Arc<dyn TransportConnection> = Arc::new(CountingTransport {
            inner,
            counts: Arc::clone(&counts),
        });
        tx.send(transport).unwrap();
        peer.finish_sending();
        connections.push((peer, counts));
    }

    // Held open, every connection parks in Draining after its streams are completed.
    wait_until(|| {
        let snapshot = dispatcher.registry().snapshot();
        snapshot.len() == 3 && snapshot.iter().all(|s| s.state == ConnectionState::Draining)
    })
    .await;
    let snapshot = dispatcher.registry().snapshot();
    let ids: Vec<u64> = snapshot.iter().map(|s| s.id.as_u64()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let names: HashSet<_> = snapshot.iter().map(|s| s.connection_id.as_str()).collect();
    assert_eq!(names, HashSet::from(["first", "second", "third"]));

    for (peer, _) in &connections {
        peer.close();
    }
    wait_until(|| trace.stops() == 3).await;
    assert!(dispatcher.registry().is_empty());
    assert_eq!(trace.criticals().len(), 1);

    for (peer, counts) in &connections {
        let id = peer.connection_id();
        assert_eq!(counts.input_calls.load(Ordering::SeqCst), 1, "{id}: input completions");
        assert_eq!(counts.input_first.load(Ordering::SeqCst), 1, "{id}: input first completion");
        assert_eq!(counts.output_calls.load(Ordering::SeqCst), 1, "{id}: output completions");
        assert_eq!(counts.output_first.load(Ordering::SeqCst), 1, "{id}: output first completion");
    }

    drop(tx);
    accept_loop.await.unwrap();
}

#[tokio::test]
async fn failing_pipeline_is_logged_once_and_cleaned_up() {
    let harness = start_harness(failing_for(&["b"]));

    let peers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|id| harness.connector.connect(id))
        .collect();
    for peer in &peers {
        peer.finish_sending();
    }

    wait_until(|| harness.trace.stops() == 3).await;
    assert_eq!(harness.trace.starts(), 3);
    assert!(harness.dispatcher.registry().is_empty());

    let criticals = harness.trace.criticals();
    assert_eq!(criticals.len(), 1);
    match &criticals[0] {
        TraceEvent::Critical {
            component,
            step,
            connection_id,
            message,
        } => {
            assert_eq!(*component, "Dispatcher");
            assert_eq!(*step, "execute");
            assert_eq!(connection_id, "b");
            assert!(message.contains("rejected b"), "unexpected message: {message}");
        }
        other => panic!("expected a critical event, got {other:?}"),
    }
    for peer in &peers {
        assert_eq!(peer.complete_calls(), 1);
    }
}

#[tokio::test]
async fn start_precedes_stop_for_every_connection() {
    let harness = start_harness(failing_for(&[]));
    for id in ["x", "y"] {
        harness.connector.connect(id).finish_sending();
    }

    wait_until(|| harness.trace.stops() == 2).await;
    let events = harness.trace.events();
    for id in ["x", "y"] {
        let start = events.iter().position(|e| *e == TraceEvent::Start(id.into()));
        let stop = events.iter().position(|e| *e == TraceEvent::Stop(id.into()));
        assert!(start.unwrap() < stop.unwrap(), "{id}: {events:?}");
    }
}

#[tokio::test]
async fn fatal_accept_error_leaves_running_connections_alone() {
    let harness = start_harness(Arc::new(drain_input));

    let peers: Vec<_> = (0..5)
        .map(|n| harness.connector.connect(format!("peer-{n}")))
        .collect();
    harness
        .connector
        .fail(AcceptError::Fatal(io::Error::other("listener broken")));

    tokio::time::timeout(Duration::from_secs(2), harness.accept_loop)
        .await
        .expect("accept loop stopped")
        .unwrap();

    wait_until(|| harness.dispatcher.registry().len() == 5).await;
    assert_eq!(harness.trace.stops(), 0);

    for peer in &peers {
        peer.finish_sending();
    }
    wait_until(|| harness.dispatcher.registry().is_empty()).await;
    assert_eq!(harness.trace.stops(), 5);
    assert!(harness.trace.criticals().is_empty());
}

#[tokio::test]
async fn retryable_accept_errors_keep_accepting() {
    let harness = start_harness(failing_for(&[]));

    for _ in 0..3 {
        harness
            .connector
            .fail(AcceptError::Retryable(io::ErrorKind::ConnectionAborted.into()));
    }
    let peer = harness.connector.connect("after-errors");
    peer.send(b"still here").await.unwrap();
    peer.finish_sending();

    assert_eq!(peer.receive_to_end().await, b"still here");
    assert!(!harness.accept_loop.is_finished());
    wait_until(|| harness.trace.stops() == 1).await;
}

#[tokio::test]
async fn one_failure_does_not_disturb_other_connections() {
    let harness = start_harness(failing_for(&["a"]));

    let a = harness.connector.connect("a");
    let b = harness.connector.connect("b");
    let c = harness.connector.connect("c");

    for (peer, payload) in [(&b, &b"bravo"[..]), (&c, &b"charlie"[..])] {
        peer.send(payload).await.unwrap();
        peer.finish_sending();
    }

    assert_eq!(b.receive_to_end().await, b"bravo");
    assert_eq!(c.receive_to_end().await, b"charlie");
    assert!(a.receive_to_end().await.is_empty());

    wait_until(|| harness.trace.stops() == 3).await;
    assert_eq!(harness.trace.criticals().len(), 1);
}

#[tokio::test]
async fn streams_are_completed_when_pipeline_fails() {
    let harness = start_harness(failing_for(&["held"]));
    let peer = harness
        .connector
        .connect_with_policy("held", ClosePolicy::HoldOpen);

    // Output completion reaches the peer even though the pipeline never wrote.
    assert!(peer.receive_to_end().await.is_empty());
    assert!(peer.send(b"late").await.unwrap().is_completed);

    wait_until(|| harness.trace.criticals().len() == 1).await;
    assert_eq!(harness.dispatcher.registry().len(), 1);
    assert_eq!(peer.complete_calls(), 0);

    peer.close();
    wait_until(|| harness.dispatcher.registry().is_empty()).await;
    assert_eq!(peer.complete_calls(), 1);
    wait_until(|| peer.is_disposed()).await;
}

#[tokio::test]
async fn panicking_pipeline_is_contained() {
    let harness = start_harness(Arc::new(panic_on_boom));

    harness.connector.connect("boom");
    harness.connector.connect("fine");

    wait_until(|| harness.trace.stops() == 2).await;
    let criticals = harness.trace.criticals();
    assert_eq!(criticals.len(), 1);
    assert!(matches!(
        &criticals[0],
        TraceEvent::Critical { connection_id, message, .. }
            if connection_id == "boom" && message.contains("pipeline exploded")
    ));
    assert!(harness.dispatcher.registry().is_empty());
    assert!(!harness.accept_loop.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connections_get_distinct_increasing_ids() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let delegate: Arc<dyn ConnectionDelegate> = Arc::new({
        let seen = Arc::clone(&seen);
        move |connection: Arc<dyn TransportConnection>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(connection.connection_id().to_string());
                Ok::<(), BoxError>(())
            }
        }
    });
    let harness = start_harness(delegate);

    let peers: Vec<_> = (0..50)
        .map(|n| {
            harness
                .connector
                .connect_with_policy(format!("c{n}"), ClosePolicy::HoldOpen)
        })
        .collect();

    wait_until(|| harness.dispatcher.registry().len() == 50).await;
    let ids: Vec<u64> = harness
        .dispatcher
        .registry()
        .snapshot()
        .iter()
        .map(|s| s.id.as_u64())
        .collect();
    assert_eq!(ids, (1..=50).collect::<Vec<_>>());

    for peer in &peers {
        peer.close();
    }
    wait_until(|| harness.dispatcher.registry().is_empty()).await;

    let unique: HashSet<_> = seen.lock().unwrap().iter().cloned().collect();
    assert_eq!(unique.len(), 50);
}
