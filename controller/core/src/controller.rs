//! Session Controller - the single owner of a streaming session
//!
//! The controller owns the backend connection, the content demultiplexer and
//! its buffers, the prose debounce, the workflow state machine, the output
//! queue and the persistence bridge. Nothing else mutates them: surfaces talk
//! to it through [`ControllerCommand`]s and hear back through
//! [`ControllerMessage`]s, like any other UI-agnostic core.
//!
//! # Event loop
//!
//! [`SessionController::run`] is one `tokio::select!` loop over three
//! sources:
//!
//! - commands from the surface
//! - connection events (frames, losses, reconnect timer)
//! - the prose debounce window
//!
//! Every handler runs to completion before the next event is taken, so
//! frames are processed strictly in arrival order.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frames::{Frame, FrameKind, ProtocolError};
use crate::intents::Intent;
use crate::persistence::{
    LoadedSession, PersistenceBridge, PersistenceError, Session, SessionDraft, SessionStore,
    SessionSummary, TreeNode,
};
use crate::streaming::{
    Block, Debounce, Demultiplexer, OutputQueue, OutputQueueConfig, OutputSink, QueueStats,
    RouteOutcome,
};
use crate::transport::{
    ChannelTransport, ConnectionEvent, ConnectionManager, ConnectionStats, TransportConfig,
};
use crate::workflow::{Completion, RunId, Workflow, WorkflowState};

/// Default prose debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(120);

/// Controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Window for coalescing prose fragments
    pub debounce: Duration,
    /// Ask for a plan before implementing unless a submit says otherwise
    pub plan_first: bool,
    /// Output queue settings
    pub output: OutputQueueConfig,
    /// Open the channel as soon as `run` starts
    pub connect_on_start: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            plan_first: false,
            output: OutputQueueConfig::default(),
            connect_on_start: true,
        }
    }
}

/// Requests from a surface
pub enum ControllerCommand {
    /// Start a new generation
    Submit {
        /// Prompt text
        prompt: String,
        /// Per-request override of the plan-first setting
        plan_first: Option<bool>,
    },
    /// Open a clarification on the ready plan
    BeginClarification,
    /// Drop an open clarification
    AbandonClarification,
    /// Send a clarification and re-plan
    Clarify(String),
    /// Accept the ready plan and implement it
    AcceptPlan,
    /// Save the current prompt, code and console output
    SaveSession {
        /// Project name; the storage picks one when absent
        name: Option<String>,
    },
    /// Retry a save that failed
    RetrySave,
    /// Change the plan-first default
    SetPlanFirst(bool),
    /// Attach the display surface
    AttachSink(Box<dyn OutputSink>),
    /// Stop the controller
    Shutdown,
}

impl fmt::Debug for ControllerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit { prompt, plan_first } => f
                .debug_struct("Submit")
                .field("prompt", prompt)
                .field("plan_first", plan_first)
                .finish(),
            Self::BeginClarification => f.write_str("BeginClarification"),
            Self::AbandonClarification => f.write_str("AbandonClarification"),
            Self::Clarify(text) => f.debug_tuple("Clarify").field(text).finish(),
            Self::AcceptPlan => f.write_str("AcceptPlan"),
            Self::SaveSession { name } => {
                f.debug_struct("SaveSession").field("name", name).finish()
            }
            Self::RetrySave => f.write_str("RetrySave"),
            Self::SetPlanFirst(on) => f.debug_tuple("SetPlanFirst").field(on).finish(),
            Self::AttachSink(_) => f.write_str("AttachSink(..)"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Notification severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Something needs attention; work continues
    Warning,
    /// A request failed
    Error,
}

/// Updates for a surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerMessage {
    /// The channel opened
    Connected {
        /// Whether this replaced a lost connection
        reconnected: bool,
    },
    /// The channel was lost
    Disconnected {
        /// Cause, if known
        reason: Option<String>,
        /// Whether a reconnect is scheduled
        reconnect_pending: bool,
    },
    /// Workflow state changed
    State {
        /// The new state
        state: WorkflowState,
    },
    /// Loading indication changed
    Loading {
        /// Whether a request is outstanding
        active: bool,
    },
    /// A code fragment was appended to the live artifact
    CodeAppended {
        /// The new fragment
        fragment: String,
    },
    /// The planning transcript changed
    PlanUpdated {
        /// Full transcript so far
        transcript: String,
    },
    /// A plan is ready for review
    PlanReady {
        /// Plan text
        plan: String,
    },
    /// User-facing notice
    Notify {
        /// Severity
        level: NotifyLevel,
        /// Text
        message: String,
    },
    /// A command was refused; nothing changed
    Rejected {
        /// Which request, e.g. "submit"
        request: &'static str,
        /// Why
        reason: String,
    },
    /// A frame was dropped as a protocol violation
    FrameDropped {
        /// What was wrong with it
        error: String,
    },
    /// A session was saved and loaded back
    SessionSaved {
        /// Canonical record
        session: Session,
    },
    /// Fresh session listing
    SessionsListed {
        /// Known sessions
        sessions: Vec<SessionSummary>,
        /// Session tree
        tree: Vec<TreeNode>,
    },
    /// The controller stopped
    Stopped,
}

/// Counters reported when the controller stops
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Frames parsed from the channel
    pub frames_received: u64,
    /// Frames dropped as protocol violations
    pub protocol_errors: u64,
    /// Generations started
    pub runs_started: u64,
    /// Runs that ended in `Failed`
    pub runs_failed: u64,
    /// Saves triggered by a completed run
    pub saves_triggered: u64,
    /// Saves requested by the user
    pub manual_saves: u64,
    /// Connection counters
    pub connection: ConnectionStats,
    /// Output queue counters
    pub output: QueueStats,
}

/// Errors talking to a running controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller task has stopped
    #[error("session controller has stopped")]
    Stopped,

    /// The controller task panicked or was cancelled
    #[error("session controller task failed: {0}")]
    Task(String),
}

/// The streaming session controller
pub struct SessionController<T: ChannelTransport, S: SessionStore> {
    connection: ConnectionManager<T>,
    demux: Demultiplexer,
    debounce: Debounce,
    workflow: Workflow,
    queue: OutputQueue,
    bridge: PersistenceBridge<S>,
    /// Everything handed to the output queue since the run started
    console_transcript: String,
    loading: bool,
    plan_first: bool,
    connect_on_start: bool,
    stats: ControllerStats,
    tx: mpsc::Sender<ControllerMessage>,
}

impl<T, S> SessionController<T, S>
where
    T: ChannelTransport + 'static,
    S: SessionStore + 'static,
{
    /// Create a controller; must be called inside a tokio runtime
    pub fn new(
        transport: T,
        transport_config: TransportConfig,
        store: S,
        config: &ControllerConfig,
        tx: mpsc::Sender<ControllerMessage>,
    ) -> Self {
        Self {
            connection: ConnectionManager::new(transport, transport_config),
            demux: Demultiplexer::new(),
            debounce: Debounce::new(config.debounce),
            workflow: Workflow::new(),
            queue: OutputQueue::new(&config.output),
            bridge: PersistenceBridge::new(store),
            console_transcript: String::new(),
            loading: false,
            plan_first: config.plan_first,
            connect_on_start: config.connect_on_start,
            stats: ControllerStats::default(),
            tx,
        }
    }

    /// Spawn the event loop and return a handle to it
    pub fn spawn(self) -> ControllerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(commands_rx));
        ControllerHandle {
            commands: commands_tx,
            task,
        }
    }

    /// Run until `Shutdown` or until every command sender is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) -> ControllerStats {
        tracing::info!(endpoint = %self.connection.endpoint(), "Session controller started");
        if self.connect_on_start {
            self.connect().await;
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ControllerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                event = self.connection.next_event() => {
                    self.handle_connection_event(event).await;
                }
                () = self.debounce.expired(), if self.debounce.is_armed() => {
                    self.flush_debounced().await;
                }
            }
        }

        self.shutdown().await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: ControllerCommand) {
        tracing::debug!(command = ?command, "Command");
        match command {
            ControllerCommand::Submit { prompt, plan_first } => {
                let plan_first = plan_first.unwrap_or(self.plan_first);
                self.start_generation(&prompt, plan_first).await;
            }
            ControllerCommand::BeginClarification => {
                match self.workflow.begin_clarification() {
                    Ok(()) => self.announce_state().await,
                    Err(e) => self.reject("clarify", e.to_string()).await,
                }
            }
            ControllerCommand::AbandonClarification => {
                match self.workflow.abandon_clarification() {
                    Ok(()) => self.announce_state().await,
                    Err(e) => self.reject("cancel", e.to_string()).await,
                }
            }
            ControllerCommand::Clarify(text) => self.clarify(&text).await,
            ControllerCommand::AcceptPlan => self.accept_plan().await,
            ControllerCommand::SaveSession { name } => self.save_current(name).await,
            ControllerCommand::RetrySave => self.retry_save().await,
            ControllerCommand::SetPlanFirst(on) => {
                self.plan_first = on;
                let mode = if on { "on" } else { "off" };
                self.notify(NotifyLevel::Info, format!("plan first is {mode}"))
                    .await;
            }
            ControllerCommand::AttachSink(sink) => {
                if let Err(e) = self.queue.attach_boxed(sink) {
                    self.reject("attach", e.to_string()).await;
                }
            }
            ControllerCommand::Shutdown => {}
        }
    }

    /// Refuse requests that need the channel while it is down
    async fn require_open(&mut self, request: &'static str) -> bool {
        if self.connection.is_open() {
            return true;
        }
        let reason = if self.connection.reconnect_pending() {
            "not connected to the backend; reconnecting"
        } else {
            "not connected to the backend"
        };
        self.reject(request, reason.to_string()).await;
        false
    }

    async fn start_generation(&mut self, prompt: &str, plan_first: bool) {
        if !self.require_open("submit").await {
            return;
        }
        let intent = match self.workflow.submit(prompt, plan_first) {
            Ok(intent) => intent,
            Err(e) => {
                self.reject("submit", e.to_string()).await;
                return;
            }
        };

        self.debounce.cancel();
        self.demux.begin_run();
        self.console_transcript.clear();
        self.stats.runs_started += 1;
        self.dispatch(intent).await;
    }

    async fn clarify(&mut self, text: &str) {
        if !self.require_open("clarify").await {
            return;
        }
        match self.workflow.clarify(text) {
            Ok(intent) => {
                self.demux.annotate_plan(text.trim());
                self.emit(ControllerMessage::PlanUpdated {
                    transcript: self.demux.plan_transcript().to_string(),
                })
                .await;
                self.dispatch(intent).await;
            }
            Err(e) => self.reject("clarify", e.to_string()).await,
        }
    }

    async fn accept_plan(&mut self) {
        if !self.require_open("accept").await {
            return;
        }
        match self.workflow.accept_plan() {
            Ok(intent) => {
                self.debounce.cancel();
                self.demux.begin_implementation();
                self.dispatch(intent).await;
            }
            Err(e) => self.reject("accept", e.to_string()).await,
        }
    }

    /// Send the intent of a state transition that opened a request
    async fn dispatch(&mut self, intent: Intent) {
        self.connection.set_suppressed(true);
        self.set_loading(true).await;
        self.announce_state().await;

        if let Err(e) = self.connection.send(&intent).await {
            tracing::warn!(intent = intent.name(), error = %e, "Intent send failed");
            if let ConnectionEvent::Disconnected { reason } =
                self.connection.report_loss(Some(e.to_string()))
            {
                self.on_channel_lost(reason).await;
            }
        }
    }

    // =========================================================================
    // Connection events
    // =========================================================================

    async fn connect(&mut self) {
        match self.connection.connect().await {
            Ok(ConnectionEvent::Connected { reconnected }) => self.on_connected(reconnected).await,
            Ok(_) => {}
            Err(e) => {
                self.emit(ControllerMessage::Disconnected {
                    reason: Some(e.to_string()),
                    reconnect_pending: self.connection.reconnect_pending(),
                })
                .await;
            }
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { reconnected } => self.on_connected(reconnected).await,
            ConnectionEvent::Text(text) => self.handle_text(&text).await,
            ConnectionEvent::Disconnected { reason } => self.on_channel_lost(reason).await,
            ConnectionEvent::ReconnectDue => self.connect().await,
        }
    }

    async fn on_connected(&mut self, reconnected: bool) {
        self.emit(ControllerMessage::Connected { reconnected }).await;
        let refreshed = self.bridge.refresh_listing().await.map(|_| ());
        match refreshed {
            Ok(()) => {
                self.emit(ControllerMessage::SessionsListed {
                    sessions: self.bridge.sessions().to_vec(),
                    tree: self.bridge.tree().to_vec(),
                })
                .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session listing failed");
                self.notify(NotifyLevel::Warning, format!("could not list sessions: {e}"))
                    .await;
            }
        }
    }

    async fn on_channel_lost(&mut self, reason: Option<String>) {
        if self.workflow.state().is_active() {
            let failure = format!(
                "connection lost: {}",
                reason.as_deref().unwrap_or("unknown cause")
            );
            self.debounce.cancel();
            let mut blocks = self.demux.flush_all();
            blocks.push(Block::Error(failure.clone()));
            self.emit_blocks(blocks).await;
            self.fail_run(&failure).await;
        }

        self.emit(ControllerMessage::Disconnected {
            reason,
            reconnect_pending: self.connection.reconnect_pending(),
        })
        .await;
    }

    // =========================================================================
    // Frames
    // =========================================================================

    async fn handle_text(&mut self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                self.drop_frame(e).await;
                return;
            }
        };
        self.stats.frames_received += 1;

        let Some(phase) = self.workflow.state().routing_phase() else {
            self.demux.record_dropped();
            self.drop_frame(ProtocolError::Unexpected {
                kind: frame.kind(),
                context: "with no active run",
            })
            .await;
            return;
        };

        let kind = frame.kind();
        tracing::debug!(kind = %kind, phase = ?phase, "Frame");
        if kind != FrameKind::Message {
            self.debounce.cancel();
        }

        let routed = self.demux.route(frame, phase);
        self.emit_blocks(routed.blocks).await;

        match routed.outcome {
            RouteOutcome::Continue => {}
            RouteOutcome::ProseBuffered => self.debounce.arm(),
            RouteOutcome::CodeAppended(fragment) => {
                self.emit(ControllerMessage::CodeAppended { fragment }).await;
            }
            RouteOutcome::PlanUpdated => {
                self.emit(ControllerMessage::PlanUpdated {
                    transcript: self.demux.plan_transcript().to_string(),
                })
                .await;
            }
            RouteOutcome::Failed(reason) => {
                self.fail_run(&reason).await;
                self.notify(NotifyLevel::Error, format!("generation failed: {reason}"))
                    .await;
            }
            RouteOutcome::PlanComplete(plan) => self.finish_request(&plan).await,
            RouteOutcome::Completed => {
                let transcript = self.demux.plan_transcript().to_string();
                self.finish_request(&transcript).await;
            }
            RouteOutcome::Dropped(e) => self.drop_frame(e).await,
        }
    }

    async fn drop_frame(&mut self, error: ProtocolError) {
        self.stats.protocol_errors += 1;
        tracing::warn!(error = %error, "Dropped frame");
        self.emit(ControllerMessage::FrameDropped {
            error: error.to_string(),
        })
        .await;
    }

    async fn flush_debounced(&mut self) {
        self.debounce.cancel();
        if let Some(block) = self.demux.flush_prose() {
            self.emit_blocks(vec![block]).await;
        }
    }

    /// `end_of_stream` for the outstanding request
    async fn finish_request(&mut self, plan_transcript: &str) {
        let completion = match self.workflow.complete(plan_transcript) {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring end of stream");
                return;
            }
        };

        self.set_loading(false).await;
        self.connection.set_suppressed(false);
        self.announce_state().await;

        match completion {
            Completion::PlanReady { plan } => {
                self.emit(ControllerMessage::PlanReady { plan }).await;
            }
            Completion::Finished { run_id, prompt } => self.save_run(run_id, prompt).await,
        }
    }

    async fn fail_run(&mut self, reason: &str) {
        if self.workflow.fail(reason) {
            self.stats.runs_failed += 1;
            tracing::warn!(run = ?self.workflow.run_id().map(|id| id.to_string()), reason, "Run failed");
        }
        self.set_loading(false).await;
        self.connection.set_suppressed(false);
        self.announce_state().await;
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Checkpoint a finished run; the only automatic save
    async fn save_run(&mut self, run_id: RunId, prompt: String) {
        self.stats.saves_triggered += 1;
        tracing::info!(run = %run_id, "Saving finished run");
        let draft = SessionDraft {
            prompt,
            code: self.demux.code_artifact().to_string(),
            console_output: self.console_transcript.clone(),
        };
        let result = self.bridge.save(draft, None).await;
        self.report_save(result).await;
    }

    async fn save_current(&mut self, name: Option<String>) {
        if self.workflow.state().is_active() {
            self.reject(
                "save",
                "wait for the running generation to finish before saving".to_string(),
            )
            .await;
            return;
        }
        if self.workflow.prompt().is_empty() && self.demux.code_artifact().is_empty() {
            self.notify(NotifyLevel::Info, "nothing to save yet".to_string())
                .await;
            return;
        }

        self.stats.manual_saves += 1;
        let draft = SessionDraft {
            prompt: self.workflow.prompt().to_string(),
            code: self.demux.code_artifact().to_string(),
            console_output: self.console_transcript.clone(),
        };
        let result = self.bridge.save(draft, name).await;
        self.report_save(result).await;
    }

    async fn retry_save(&mut self) {
        match self.bridge.retry().await {
            Err(PersistenceError::NothingToRetry) => {
                self.notify(NotifyLevel::Info, "every session is saved".to_string())
                    .await;
            }
            result => self.report_save(result).await,
        }
    }

    async fn report_save(&mut self, result: Result<LoadedSession, PersistenceError>) {
        match result {
            Ok(loaded) => {
                self.emit(ControllerMessage::SessionSaved {
                    session: loaded.session,
                })
                .await;
                self.emit(ControllerMessage::SessionsListed {
                    sessions: loaded.sessions,
                    tree: loaded.tree,
                })
                .await;
                let unsynced = self.bridge.unsynced_count();
                if unsynced > 0 {
                    self.notify(
                        NotifyLevel::Info,
                        format!("{unsynced} unsaved session(s) remain; use /retry-save"),
                    )
                    .await;
                }
            }
            Err(e) if e.draft_retained() => {
                let unsynced = self.bridge.unsynced_count();
                self.notify(
                    NotifyLevel::Warning,
                    format!("session not saved ({e}); {unsynced} unsaved, use /retry-save"),
                )
                .await;
            }
            Err(e) => {
                self.notify(NotifyLevel::Warning, format!("session {e}")).await;
                self.emit(ControllerMessage::SessionsListed {
                    sessions: self.bridge.sessions().to_vec(),
                    tree: self.bridge.tree().to_vec(),
                })
                .await;
            }
        }
    }

    // =========================================================================
    // Output
    // =========================================================================

    async fn emit_blocks(&mut self, blocks: Vec<Block>) {
        for block in blocks {
            let at_line_start =
                self.console_transcript.is_empty() || self.console_transcript.ends_with('\n');
            let text = block.render(at_line_start);
            self.console_transcript.push_str(&text);
            if let Err(e) = self.queue.enqueue(&text).await {
                tracing::warn!(error = %e, "Display output dropped");
            }
        }
    }

    async fn set_loading(&mut self, active: bool) {
        if self.loading != active {
            self.loading = active;
            self.emit(ControllerMessage::Loading { active }).await;
        }
    }

    async fn announce_state(&self) {
        self.emit(ControllerMessage::State {
            state: self.workflow.state(),
        })
        .await;
    }

    async fn reject(&self, request: &'static str, reason: String) {
        tracing::debug!(request, reason = %reason, "Request rejected");
        self.emit(ControllerMessage::Rejected { request, reason }).await;
    }

    async fn notify(&self, level: NotifyLevel, message: String) {
        self.emit(ControllerMessage::Notify { level, message }).await;
    }

    async fn emit(&self, message: ControllerMessage) {
        if let Err(e) = self.tx.send(message).await {
            tracing::debug!("Surface gone, dropping message: {}", e);
        }
    }

    async fn shutdown(mut self) -> ControllerStats {
        self.debounce.cancel();
        let pending = self.demux.flush_all();
        self.emit_blocks(pending).await;
        self.connection.disconnect();

        let mut stats = std::mem::take(&mut self.stats);
        stats.connection = self.connection.stats();
        stats.output = self.queue.close().await;

        tracing::info!(
            frames = stats.frames_received,
            runs = stats.runs_started,
            saves = stats.saves_triggered,
            "Session controller stopped"
        );
        if self.tx.send(ControllerMessage::Stopped).await.is_err() {
            tracing::debug!("Surface gone before stop");
        }
        stats
    }
}

/// Handle to a spawned controller
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    task: JoinHandle<ControllerStats>,
}

impl ControllerHandle {
    /// Send a command
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the controller has exited.
    pub async fn send(&self, command: ControllerCommand) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ControllerError::Stopped)
    }

    /// Submit a prompt with the configured plan-first default
    ///
    /// # Errors
    ///
    /// Returns `Stopped` if the controller has exited.
    pub async fn submit(&self, prompt: impl Into<String>) -> Result<(), ControllerError> {
        self.send(ControllerCommand::Submit {
            prompt: prompt.into(),
            plan_first: None,
        })
        .await
    }

    /// A sender for commands, for surfaces that run their own loop
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<ControllerCommand> {
        self.commands.clone()
    }

    /// Ask the controller to stop and wait for its final counters
    ///
    /// # Errors
    ///
    /// Returns `Task` if the controller task panicked.
    pub async fn shutdown(self) -> Result<ControllerStats, ControllerError> {
        // The loop also stops once every sender is gone.
        let _ = self.commands.send(ControllerCommand::Shutdown).await;
        drop(self.commands);
        self.task
            .await
            .map_err(|e| ControllerError::Task(e.to_string()))
    }
}
