//! Application pipeline contract.
//!
//! # Data Flow
//! ```text
//! Dispatcher (per connection)
//!     → ConnectionDelegate::on_connection(transport)
//!         reads transport.input(), writes transport.output()
//!     → returns Ok / Err / panics
//!     → dispatcher turns Err and panics into a PipelineFault (logged, swallowed)
//! ```

pub mod echo;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::net::transport::TransportConnection;

/// Error type returned by pipelines.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Opaque per-connection application logic.
#[async_trait]
pub trait ConnectionDelegate: Send + Sync + 'static {
    /// Process one connection; return when the application is done with it.
    async fn on_connection(&self, connection: Arc<dyn TransportConnection>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> ConnectionDelegate for F
where
    F: Fn(Arc<dyn TransportConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn on_connection(&self, connection: Arc<dyn TransportConnection>) -> Result<(), BoxError> {
        (self)(connection).await
    }
}

/// How a pipeline invocation failed.
#[derive(Debug, Error)]
pub enum PipelineFault {
    #[error("pipeline failed: {0}")]
    Failed(#[source] BoxError),

    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl PipelineFault {
    /// Build a fault from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        PipelineFault::Panicked(message)
    }
}
