//! Content Demultiplexer and Flush Controller

use crate::frames::{Frame, FrameKind, ProtocolError};

/// Which sub-state of a run frames are routed for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingPhase {
    /// Waiting for a plan; prose feeds the plan transcript
    Planning,
    /// Generating code; prose goes to the display surface
    Implementing,
}

/// A unit of display output, rendered to text before it is queued
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    /// Flushed assistant prose
    Prose(String),
    /// Marker standing in for flushed code
    CodeSummary {
        /// Characters of code flushed
        chars: usize,
    },
    /// Labeled console output
    Console(String),
    /// Labeled status line
    Status(String),
    /// Labeled backend error
    Error(String),
    /// Completion marker for a finished run
    Completion,
}

impl Block {
    /// Text written to the display surface.
    ///
    /// Prose passes through verbatim so debounced fragments join up; every
    /// labeled block starts on a fresh line and ends with a newline.
    #[must_use]
    pub fn render(&self, at_line_start: bool) -> String {
        let labeled = match self {
            Self::Prose(text) => return text.clone(),
            Self::CodeSummary { chars } => format!("[code] {chars} chars received\n"),
            Self::Console(text) => with_newline(format!("[console]\n{text}")),
            Self::Status(text) => format!("[status] {text}\n"),
            Self::Error(text) => format!("[error] {text}\n"),
            Self::Completion => "[done] generation complete\n".to_string(),
        };
        if at_line_start {
            labeled
        } else {
            format!("\n{labeled}")
        }
    }
}

fn with_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// What the owner must do after a frame was routed
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Nothing beyond queuing the blocks
    Continue,
    /// Prose was buffered; arm the debounce
    ProseBuffered,
    /// A code fragment was appended to the live artifact
    CodeAppended(String),
    /// The planning transcript grew
    PlanUpdated,
    /// The backend reported an error; the run failed
    Failed(String),
    /// Planning finished; carries the materialized plan
    PlanComplete(String),
    /// Implementation finished
    Completed,
    /// The frame violated the protocol and was dropped
    Dropped(ProtocolError),
}

/// Blocks to queue, in order, plus the outcome
#[derive(Debug)]
pub struct Routed {
    /// Output to enqueue, in order
    pub blocks: Vec<Block>,
    /// Follow-up for the owner
    pub outcome: RouteOutcome,
}

impl Routed {
    fn new(blocks: Vec<Block>, outcome: RouteOutcome) -> Self {
        Self { blocks, outcome }
    }
}

/// Per-kind accumulation buffers, append-only until flushed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingBuffers {
    message: String,
    code: String,
}

impl PendingBuffers {
    /// Unflushed prose
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Unflushed code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Whether both buffers hold content at once
    #[must_use]
    pub fn both_pending(&self) -> bool {
        !self.message.is_empty() && !self.code.is_empty()
    }

    fn take_message(&mut self) -> Option<Block> {
        if self.message.is_empty() {
            return None;
        }
        Some(Block::Prose(std::mem::take(&mut self.message)))
    }

    fn take_code(&mut self) -> Option<Block> {
        if self.code.is_empty() {
            return None;
        }
        let chars = self.code.chars().count();
        self.code.clear();
        Some(Block::CodeSummary { chars })
    }

    fn clear(&mut self) {
        self.message.clear();
        self.code.clear();
    }
}

/// Demultiplexer counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Frames accepted
    pub frames_routed: u64,
    /// Frames dropped as protocol violations
    pub frames_dropped: u64,
    /// Prose blocks flushed
    pub prose_flushes: u64,
    /// Code summary blocks flushed
    pub code_flushes: u64,
}

/// Routes frames of one run to buffers, the plan transcript and the sink
#[derive(Debug, Default)]
pub struct Demultiplexer {
    buffers: PendingBuffers,
    plan_transcript: String,
    code_artifact: String,
    stats: DemuxStats,
}

impl Demultiplexer {
    /// Create an empty demultiplexer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one frame.
    ///
    /// Returned blocks must be queued in order before any later output.
    pub fn route(&mut self, frame: Frame, phase: RoutingPhase) -> Routed {
        let kind = frame.kind();
        if phase == RoutingPhase::Planning && kind == FrameKind::Code {
            self.stats.frames_dropped += 1;
            return Routed::new(
                Vec::new(),
                RouteOutcome::Dropped(ProtocolError::Unexpected {
                    kind,
                    context: "during planning",
                }),
            );
        }
        self.stats.frames_routed += 1;

        let routed = match frame {
            Frame::Message(text) => match phase {
                RoutingPhase::Planning => {
                    self.plan_transcript.push_str(&text);
                    Routed::new(Vec::new(), RouteOutcome::PlanUpdated)
                }
                RoutingPhase::Implementing => {
                    let blocks = self.flush_code().into_iter().collect();
                    self.buffers.message.push_str(&text);
                    Routed::new(blocks, RouteOutcome::ProseBuffered)
                }
            },
            Frame::Code(text) => {
                let blocks = self.flush_prose().into_iter().collect();
                self.buffers.code.push_str(&text);
                self.code_artifact.push_str(&text);
                Routed::new(blocks, RouteOutcome::CodeAppended(text))
            }
            Frame::Console(text) => {
                let mut blocks: Vec<Block> = self.flush_prose().into_iter().collect();
                blocks.push(Block::Console(text));
                Routed::new(blocks, RouteOutcome::Continue)
            }
            Frame::Status(text) => {
                let mut blocks = self.flush_all();
                blocks.push(Block::Status(text));
                Routed::new(blocks, RouteOutcome::Continue)
            }
            Frame::Error(text) => {
                let mut blocks = self.flush_all();
                blocks.push(Block::Error(text.clone()));
                Routed::new(blocks, RouteOutcome::Failed(text))
            }
            Frame::EndOfStream => match phase {
                RoutingPhase::Planning => {
                    let blocks = self.flush_all();
                    Routed::new(blocks, RouteOutcome::PlanComplete(self.plan_transcript.clone()))
                }
                RoutingPhase::Implementing => {
                    let mut blocks = self.flush_all();
                    blocks.push(Block::Completion);
                    Routed::new(blocks, RouteOutcome::Completed)
                }
            },
        };

        debug_assert!(!self.buffers.both_pending());
        routed
    }

    /// Flush buffered prose, e.g. when the debounce window closes
    pub fn flush_prose(&mut self) -> Option<Block> {
        let block = self.buffers.take_message();
        if block.is_some() {
            self.stats.prose_flushes += 1;
        }
        block
    }

    fn flush_code(&mut self) -> Option<Block> {
        let block = self.buffers.take_code();
        if block.is_some() {
            self.stats.code_flushes += 1;
        }
        block
    }

    /// Flush both buffers, prose first
    pub fn flush_all(&mut self) -> Vec<Block> {
        self.flush_prose()
            .into_iter()
            .chain(self.flush_code())
            .collect()
    }

    /// Record a frame dropped before routing
    pub fn record_dropped(&mut self) {
        self.stats.frames_dropped += 1;
    }

    /// Reset everything for a fresh generation run
    pub fn begin_run(&mut self) {
        self.buffers.clear();
        self.plan_transcript.clear();
        self.code_artifact.clear();
    }

    /// Reset buffers and the code artifact for the implementation phase;
    /// the plan transcript is kept for display
    pub fn begin_implementation(&mut self) {
        self.buffers.clear();
        self.code_artifact.clear();
    }

    /// Annotate the plan transcript with a clarification before re-planning
    pub fn annotate_plan(&mut self, clarification: &str) {
        if !self.plan_transcript.is_empty() && !self.plan_transcript.ends_with('\n') {
            self.plan_transcript.push('\n');
        }
        self.plan_transcript
            .push_str(&format!("\n> Clarification: {clarification}\n\n"));
        self.buffers.clear();
    }

    /// Current pending buffers
    #[must_use]
    pub fn buffers(&self) -> &PendingBuffers {
        &self.buffers
    }

    /// Planning transcript of the current run
    #[must_use]
    pub fn plan_transcript(&self) -> &str {
        &self.plan_transcript
    }

    /// Concatenation of every code fragment of the current run
    #[must_use]
    pub fn code_artifact(&self) -> &str {
        &self.code_artifact
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }
}
