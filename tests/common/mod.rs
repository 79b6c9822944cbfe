//! Shared utilities for integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Level, Span};

use conn_dispatch::dispatch::{Dispatcher, ServiceContext};
use conn_dispatch::net::memory::{MemoryConnector, MemoryListener};
use conn_dispatch::observability::ConnectionTrace;
use conn_dispatch::pipeline::ConnectionDelegate;

/// One event observed by `RecordingTrace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Start(String),
    Stop(String),
    Critical {
        component: &'static str,
        step: &'static str,
        connection_id: String,
        message: String,
    },
}

/// `ConnectionTrace` that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingTrace {
    events: Mutex<Vec<TraceEvent>>,
}

#[allow(dead_code)]
impl RecordingTrace {
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.count(|e| matches!(e, TraceEvent::Start(_)))
    }

    pub fn stops(&self) -> usize {
        self.count(|e| matches!(e, TraceEvent::Stop(_)))
    }

    pub fn criticals(&self) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, TraceEvent::Critical { .. }))
            .collect()
    }

    fn count(&self, predicate: impl Fn(&TraceEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    fn push(&self, event: TraceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConnectionTrace for RecordingTrace {
    fn connection_start(&self, connection_id: &str) {
        self.push(TraceEvent::Start(connection_id.to_string()));
    }

    fn connection_stop(&self, connection_id: &str) {
        self.push(TraceEvent::Stop(connection_id.to_string()));
    }

    fn log_critical(
        &self,
        component: &'static str,
        step: &'static str,
        connection_id: &str,
        fault: &(dyn std::error::Error + 'static),
    ) {
        self.push(TraceEvent::Critical {
            component,
            step,
            connection_id: connection_id.to_string(),
            message: fault.to_string(),
        });
    }

    fn is_enabled(&self, _level: Level) -> bool {
        true
    }

    fn begin_scope(&self, connection_id: &str) -> Span {
        tracing::info_span!("test_connection", connection_id = %connection_id)
    }
}

/// A dispatcher accepting from an in-memory listener.
#[allow(dead_code)]
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub trace: Arc<RecordingTrace>,
    pub connector: MemoryConnector,
    pub accept_loop: JoinHandle<()>,
}

#[allow(dead_code)]
pub fn start_harness(delegate: Arc<dyn ConnectionDelegate>) -> Harness {
    let trace = Arc::new(RecordingTrace::default());
    let context = Arc::new(ServiceContext::new(trace.clone()));
    let (listener, connector) = MemoryListener::bind(&context);
    let dispatcher = Arc::new(Dispatcher::new(context, delegate));
    let accept_loop = dispatcher.start_accepting_connections(listener);
    Harness {
        dispatcher,
        trace,
        connector,
        accept_loop,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
#[allow(dead_code)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
