//! Output Sink Queue
//!
//! Ordered delivery of display text with one write in flight.
//!
//! `enqueue` splits text into bounded chunks and appends them to a bounded
//! channel. A single drain task owns the [`OutputSink`] and writes one chunk
//! at a time, awaiting each write before taking the next. Until a sink is
//! attached the drain task holds chunks in a backlog; they are written in
//! order once one arrives.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Default chunk size, in characters
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Errors from the display surface or the queue feeding it
#[derive(Debug, Error)]
pub enum SinkError {
    /// The surface rejected a write
    #[error("display write failed: {0}")]
    Write(String),

    /// The queue's drain task is gone
    #[error("output queue closed")]
    Closed,

    /// A sink was already attached
    #[error("a display surface is already attached")]
    AlreadyAttached,

    /// IO error from the surface
    #[error("display IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A display surface that accepts text chunks
#[async_trait]
pub trait OutputSink: Send {
    /// Write one chunk; resolves when the surface has taken it
    async fn write(&mut self, chunk: &str) -> Result<(), SinkError>;

    /// Whether `write` completion means the surface finished the write.
    ///
    /// When false the drain task yields to the scheduler once per chunk.
    fn acknowledges_writes(&self) -> bool {
        true
    }
}

/// Queue configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputQueueConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Chunks the channel holds before `enqueue` waits
    pub capacity: usize,
}

impl Default for OutputQueueConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            capacity: 256,
        }
    }
}

/// Snapshot of queue counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Chunks accepted by `enqueue`
    pub enqueued: u64,
    /// Chunks written successfully
    pub written: u64,
    /// Chunks the sink failed to write
    pub failed: u64,
}

impl QueueStats {
    /// Chunks not yet handed to the sink
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.enqueued.saturating_sub(self.written + self.failed)
    }
}

struct Shared {
    stats: Mutex<QueueStats>,
    progress: Notify,
}

/// Handle to the output queue and its drain task
pub struct OutputQueue {
    chunks: mpsc::Sender<String>,
    attach: Option<oneshot::Sender<Box<dyn OutputSink>>>,
    shared: Arc<Shared>,
    chunk_size: usize,
    drain: JoinHandle<()>,
}

impl OutputQueue {
    /// Create the queue and spawn its drain task
    #[must_use]
    pub fn new(config: &OutputQueueConfig) -> Self {
        let (chunks_tx, chunks_rx) = mpsc::channel(config.capacity.max(1));
        let (attach_tx, attach_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            stats: Mutex::new(QueueStats::default()),
            progress: Notify::new(),
        });

        let drain = tokio::spawn(drain(chunks_rx, attach_rx, Arc::clone(&shared)));

        Self {
            chunks: chunks_tx,
            attach: Some(attach_tx),
            shared,
            chunk_size: config.chunk_size.max(1),
            drain,
        }
    }

    /// Attach the display surface
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAttached` on a second call, `Closed` if the drain
    /// task has ended.
    pub fn attach<S: OutputSink + 'static>(&mut self, sink: S) -> Result<(), SinkError> {
        self.attach_boxed(Box::new(sink))
    }

    /// Attach an already boxed display surface
    ///
    /// # Errors
    ///
    /// Same as [`attach`](Self::attach).
    pub fn attach_boxed(&mut self, sink: Box<dyn OutputSink>) -> Result<(), SinkError> {
        let attach = self.attach.take().ok_or(SinkError::AlreadyAttached)?;
        attach.send(sink).map_err(|_| SinkError::Closed)
    }

    /// Split `text` into chunks and append them.
    ///
    /// Returns the number of chunks queued. Waits only while the channel is
    /// full; never waits for writes.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the drain task has ended.
    pub async fn enqueue(&self, text: &str) -> Result<usize, SinkError> {
        let chunks = chunk_text(text, self.chunk_size);
        let count = chunks.len();
        for chunk in chunks {
            self.shared.stats.lock().enqueued += 1;
            if self.chunks.send(chunk).await.is_err() {
                self.shared.stats.lock().enqueued -= 1;
                return Err(SinkError::Closed);
            }
        }
        Ok(count)
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.shared.stats.lock().clone()
    }

    /// Wait until every queued chunk has been handed to the sink
    pub async fn wait_idle(&self) {
        loop {
            let progressed = self.shared.progress.notified();
            if self.stats().pending() == 0 {
                return;
            }
            progressed.await;
        }
    }

    /// Close the queue, let the drain finish, and return final counters.
    ///
    /// Chunks still in the backlog are dropped if no sink was ever attached.
    pub async fn close(self) -> QueueStats {
        let Self {
            chunks,
            attach,
            shared,
            drain,
            ..
        } = self;
        drop(chunks);
        drop(attach);
        if let Err(e) = drain.await {
            tracing::warn!(error = %e, "Output drain task failed");
        }
        let stats = shared.stats.lock().clone();
        stats
    }
}

/// Split text into pieces of at most `max_chars` characters.
///
/// Splits on character boundaries; empty text yields no chunks.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

async fn drain(
    mut chunks: mpsc::Receiver<String>,
    mut attach: oneshot::Receiver<Box<dyn OutputSink>>,
    shared: Arc<Shared>,
) {
    let mut backlog = VecDeque::new();

    let mut sink = loop {
        tokio::select! {
            attached = &mut attach => match attached {
                Ok(sink) => break sink,
                Err(_) => {
                    tracing::debug!(
                        dropped = backlog.len(),
                        "Output queue closed before a display was attached"
                    );
                    return;
                }
            },
            chunk = chunks.recv() => match chunk {
                Some(chunk) => backlog.push_back(chunk),
                None => {
                    tracing::debug!(
                        dropped = backlog.len(),
                        "Output queue closed before a display was attached"
                    );
                    return;
                }
            },
        }
    };

    tracing::debug!(backlog = backlog.len(), "Display attached");

    loop {
        let chunk = match backlog.pop_front() {
            Some(chunk) => chunk,
            None => match chunks.recv().await {
                Some(chunk) => chunk,
                None => break,
            },
        };

        match sink.write(&chunk).await {
            Ok(()) => {
                shared.stats.lock().written += 1;
                tracing::trace!(chars = chunk.len(), "Chunk written");
            }
            Err(e) => {
                shared.stats.lock().failed += 1;
                tracing::warn!(error = %e, "Display write failed, chunk dropped");
            }
        }
        shared.progress.notify_waiters();

        if !sink.acknowledges_writes() {
            tokio::task::yield_now().await;
        }
    }

    shared.progress.notify_waiters();
    tracing::debug!("Output drain finished");
}
