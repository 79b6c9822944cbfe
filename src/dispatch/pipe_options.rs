//! Stream backpressure configuration.
//!
//! | configured limit | pause/resume threshold |
//! |------------------|------------------------|
//! | unset            | 0 (never pause)        |
//! | 0                | 1 (writer waits on reader) |
//! | N > 0            | N                      |

use crate::dispatch::ServiceContext;
use crate::net::pipe::{BufferPool, PipeOptions, PipeScheduler};

/// Map a configured buffer limit to a pipe pause/resume threshold.
pub fn buffer_threshold(limit: Option<u64>) -> u64 {
    match limit {
        None => 0,
        // A threshold of 0 would never pause; 1 makes the writer wait for the reader.
        Some(0) => 1,
        Some(n) => n,
    }
}

/// Options for the inbound pipe. The transport writes on `writer_scheduler`.
pub fn input_pipe_options(
    context: &ServiceContext,
    pool: &BufferPool,
    writer_scheduler: PipeScheduler,
) -> PipeOptions {
    let threshold = buffer_threshold(context.limits.max_request_buffer_size.as_option());
    PipeOptions {
        pool: *pool,
        reader_scheduler: context.scheduler.clone(),
        writer_scheduler,
        pause_writer_threshold: threshold,
        resume_writer_threshold: threshold,
    }
}

/// Options for the outbound pipe. The transport reads on `reader_scheduler`.
pub fn output_pipe_options(
    context: &ServiceContext,
    pool: &BufferPool,
    reader_scheduler: PipeScheduler,
) -> PipeOptions {
    let threshold = buffer_threshold(context.limits.max_response_buffer_size.as_option());
    PipeOptions {
        pool: *pool,
        reader_scheduler,
        writer_scheduler: context.scheduler.clone(),
        pause_writer_threshold: threshold,
        resume_writer_threshold: threshold,
    }
}
