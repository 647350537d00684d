//! Streaming Infrastructure for Generation Output
//!
//! Turns the interleaved frame stream of one generation run into ordered
//! output for the display surface.
//!
//! # Architecture
//!
//! ```text
//!  Frame ──▶ Demultiplexer ──┬──▶ PendingBuffers { message, code }
//!                            │          │ flush-before-switch
//!                            │          ▼
//!                            └──────▶ Block ──render──▶ OutputQueue ──▶ OutputSink
//!                                                         (one write in flight)
//! ```
//!
//! # Features
//!
//! - **Flush-before-switch**: at most one of the message and code buffers
//!   holds content when a frame of the other kind is processed
//! - **Debounced prose**: message fragments are coalesced for a short window
//! - **Summarized code**: code never reaches the sink verbatim, only a marker
//!   with its length; the full text is exposed as the live code artifact
//! - **Backpressure**: one chunk written at a time, in enqueue order

mod debounce;
mod demux;
mod queue;

pub use debounce::Debounce;
pub use demux::{Block, DemuxStats, Demultiplexer, PendingBuffers, RouteOutcome, Routed, RoutingPhase};
pub use queue::{
    chunk_text, OutputQueue, OutputQueueConfig, OutputSink, QueueStats, SinkError,
    DEFAULT_CHUNK_SIZE,
};
