//! Echo pipeline: writes every inbound byte back to the peer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::net::transport::TransportConnection;
use crate::pipeline::{BoxError, ConnectionDelegate};

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoPipeline;

#[async_trait]
impl ConnectionDelegate for EchoPipeline {
    async fn on_connection(&self, connection: Arc<dyn TransportConnection>) -> Result<(), BoxError> {
        let mut echoed = 0usize;
        loop {
            let read = connection.input().read().await?;
            if !read.buffer.is_empty() {
                echoed += read.buffer.len();
                let flush = connection.output().write(&read.buffer).await?;
                if flush.is_completed {
                    break;
                }
            }
            if read.is_completed {
                break;
            }
        }
        tracing::trace!(connection_id = %connection.connection_id(), bytes = echoed, "Echo finished");
        Ok(())
    }
}
