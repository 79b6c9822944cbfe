//! In-memory byte streams with writer backpressure.
//!
//! # Responsibilities
//! - Carry bytes between a transport pump and the application
//! - Pause the writer once unread bytes reach the pause threshold
//! - Resume the writer once the reader drains below the resume threshold
//! - Propagate completion (EOF) in both directions
//!
//! # Design Decisions
//! - Single producer, single consumer: `PipeWriter` and `PipeReader` are not `Clone`
//! - A threshold of 0 disables backpressure entirely
//! - `complete()` is idempotent on both ends; only the first call reports `true`

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Errors returned by pipe operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    /// Write attempted after the writer completed.
    #[error("writing is not allowed after the writer was completed")]
    WriterCompleted,

    /// Read attempted after the reader completed.
    #[error("reading is not allowed after the reader was completed")]
    ReaderCompleted,
}

/// Where transport work attached to a pipe end is scheduled.
#[derive(Debug, Clone, Default)]
pub enum PipeScheduler {
    /// Spawn on the runtime of the calling task.
    #[default]
    Current,
    /// Spawn on a specific runtime.
    Handle(tokio::runtime::Handle),
}

impl PipeScheduler {
    /// Spawn a task with this scheduling affinity.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self {
            PipeScheduler::Current => tokio::spawn(future),
            PipeScheduler::Handle(handle) => handle.spawn(future),
        }
    }
}

/// Hands out read segments for transport pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPool {
    segment_size: usize,
}

impl BufferPool {
    pub const DEFAULT_SEGMENT_SIZE: usize = 4096;

    pub fn new(segment_size: usize) -> Self {
        Self {
            segment_size: segment_size.max(1),
        }
    }

    /// Allocate an empty segment with room for one socket read.
    pub fn rent(&self) -> BytesMut {
        BytesMut::with_capacity(self.segment_size)
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEGMENT_SIZE)
    }
}

/// Configuration for a single pipe.
#[derive(Debug, Clone)]
pub struct PipeOptions {
    pub pool: BufferPool,
    pub reader_scheduler: PipeScheduler,
    pub writer_scheduler: PipeScheduler,
    /// Unread byte count at which the writer pauses. 0 = never.
    pub pause_writer_threshold: u64,
    /// Unread byte count below which a paused writer resumes. Clamped to `1..=pause`.
    pub resume_writer_threshold: u64,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            pool: BufferPool::default(),
            reader_scheduler: PipeScheduler::Current,
            writer_scheduler: PipeScheduler::Current,
            pause_writer_threshold: 0,
            resume_writer_threshold: 0,
        }
    }
}

/// Outcome of a write/flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// The reader completed; further writes are discarded.
    pub is_completed: bool,
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub buffer: Bytes,
    /// The writer completed; no more data will arrive after `buffer`.
    pub is_completed: bool,
}

struct State {
    buffer: BytesMut,
    writer_completed: bool,
    reader_completed: bool,
    last_activity: Instant,
}

struct Shared {
    state: Mutex<State>,
    pause_threshold: u64,
    resume_threshold: u64,
    reader_wake: Notify,
    writer_wake: Notify,
    writer_done: CancellationToken,
    reader_done: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_activity(&self) -> Instant {
        self.lock().last_activity
    }
}

/// Create a connected writer/reader pair.
pub fn pipe(options: PipeOptions) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: BytesMut::new(),
            writer_completed: false,
            reader_completed: false,
            last_activity: Instant::now(),
        }),
        pause_threshold: options.pause_writer_threshold,
        // A paused writer waits for `unread < resume`, so resume must be at least 1.
        resume_threshold: options
            .resume_writer_threshold
            .clamp(1, options.pause_writer_threshold.max(1)),
        reader_wake: Notify::new(),
        writer_wake: Notify::new(),
        writer_done: CancellationToken::new(),
        reader_done: CancellationToken::new(),
    });

    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Producer end of a pipe.
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Append `data` and flush, waiting while the pipe is over its pause threshold.
    pub async fn write(&self, data: &[u8]) -> Result<FlushResult, PipeError> {
        {
            let mut state = self.shared.lock();
            if state.writer_completed {
                return Err(PipeError::WriterCompleted);
            }
            if state.reader_completed {
                return Ok(FlushResult { is_completed: true });
            }
            state.buffer.extend_from_slice(data);
            state.last_activity = Instant::now();
        }
        self.shared.reader_wake.notify_one();
        self.flush().await
    }

    /// Wait until the reader has drained below the resume threshold.
    pub async fn flush(&self) -> Result<FlushResult, PipeError> {
        if self.shared.pause_threshold == 0 {
            let state = self.shared.lock();
            return Ok(FlushResult {
                is_completed: state.reader_completed,
            });
        }

        let mut paused = false;
        loop {
            {
                let state = self.shared.lock();
                if state.reader_completed {
                    return Ok(FlushResult { is_completed: true });
                }
                let unread = state.buffer.len() as u64;
                let limit = if paused {
                    self.shared.resume_threshold
                } else {
                    self.shared.pause_threshold
                };
                if unread < limit {
                    return Ok(FlushResult { is_completed: false });
                }
            }
            paused = true;
            self.shared.writer_wake.notified().await;
        }
    }

    /// Signal EOF to the reader. Returns `true` on the first call.
    pub fn complete(&self) -> bool {
        {
            let mut state = self.shared.lock();
            if state.writer_completed {
                return false;
            }
            state.writer_completed = true;
        }
        self.shared.writer_done.cancel();
        self.shared.reader_wake.notify_one();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().writer_completed
    }

    /// Token cancelled once the reader on the other end has completed.
    pub fn reader_completion(&self) -> CancellationToken {
        self.shared.reader_done.clone()
    }

    /// Token cancelled once this writer has completed.
    pub fn completion(&self) -> CancellationToken {
        self.shared.writer_done.clone()
    }

    /// Bytes written but not yet read.
    pub fn unread_len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.shared.last_activity()
    }
}

/// Consumer end of a pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Take everything currently buffered, waiting for data or EOF.
    pub async fn read(&self) -> Result<ReadResult, PipeError> {
        loop {
            {
                let mut state = self.shared.lock();
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if !state.buffer.is_empty() {
                    let buffer = state.buffer.split().freeze();
                    let is_completed = state.writer_completed;
                    state.last_activity = Instant::now();
                    drop(state);
                    self.shared.writer_wake.notify_one();
                    return Ok(ReadResult {
                        buffer,
                        is_completed,
                    });
                }
                if state.writer_completed {
                    return Ok(ReadResult {
                        buffer: Bytes::new(),
                        is_completed: true,
                    });
                }
            }
            self.shared.reader_wake.notified().await;
        }
    }

    /// Stop reading. Unread bytes are discarded and the writer is released.
    /// Returns `true` on the first call.
    pub fn complete(&self) -> bool {
        {
            let mut state = self.shared.lock();
            if state.reader_completed {
                return false;
            }
            state.reader_completed = true;
            state.buffer.clear();
        }
        self.shared.reader_done.cancel();
        self.shared.writer_wake.notify_one();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().reader_completed
    }

    /// Token cancelled once this reader has completed.
    pub fn completion(&self) -> CancellationToken {
        self.shared.reader_done.clone()
    }

    /// Token cancelled once the writer on the other end has completed.
    pub fn writer_completion(&self) -> CancellationToken {
        self.shared.writer_done.clone()
    }

    pub fn last_activity(&self) -> Instant {
        self.shared.last_activity()
    }
}
