//! Connection dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionListener::accept()
//!     → dispatcher.rs (accept loop, one detached task per connection)
//!     → registry.rs (add on start, remove on teardown)
//!     → ConnectionDelegate (application pipeline)
//!     → streams completed → wait for transport close → teardown
//!
//! pipe_options.rs derives stream backpressure from server limits
//! for whichever transport feeds the listener.
//! ```
//!
//! # Design Decisions
//! - Each dispatcher owns its id counter; dispatchers share nothing implicitly
//! - No cap on concurrent connections (admission is the listener's business)
//! - Pipeline failures never escape a connection task

pub mod dispatcher;
pub mod pipe_options;
pub mod registry;

use std::sync::Arc;

pub use dispatcher::Dispatcher;
pub use registry::ConnectionRegistry;

use crate::config::{AcceptConfig, LimitsConfig, ServerConfig};
use crate::net::pipe::{BufferPool, PipeScheduler};
use crate::observability::{ConnectionTrace, TracingConnectionTrace};

/// Server-wide state shared by the dispatcher, listeners and registry consumers.
pub struct ServiceContext {
    pub trace: Arc<dyn ConnectionTrace>,
    pub registry: ConnectionRegistry,
    pub limits: LimitsConfig,
    pub accept: AcceptConfig,
    /// Scheduler for application-side stream work.
    pub scheduler: PipeScheduler,
    pub pool: BufferPool,
}

impl ServiceContext {
    /// Context with default limits and the given trace.
    pub fn new(trace: Arc<dyn ConnectionTrace>) -> Self {
        Self {
            trace,
            registry: ConnectionRegistry::new(),
            limits: LimitsConfig::default(),
            accept: AcceptConfig::default(),
            scheduler: PipeScheduler::Current,
            pool: BufferPool::default(),
        }
    }

    /// Context built from a validated configuration, logging through `tracing`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            limits: config.limits,
            accept: config.accept.clone(),
            pool: BufferPool::new(config.buffers.minimum_segment_size),
            ..Self::new(Arc::new(TracingConnectionTrace))
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .field("accept", &self.accept)
            .field("scheduler", &self.scheduler)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
