//! Terminal display
//!
//! stdout is the display surface: generation output arrives there through
//! [`StdoutSink`], chunk by chunk. Everything else the controller reports is
//! rendered to stderr by [`Renderer`], so piping stdout captures only the
//! generation transcript.

use async_trait::async_trait;
use controller_core::{
    ControllerCommand, ControllerMessage, NotifyLevel, OutputSink, SinkError, WorkflowState,
};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::{mpsc, watch};

/// Display surface writing to stdout
pub struct StdoutSink {
    out: Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputSink for StdoutSink {
    async fn write(&mut self, chunk: &str) -> Result<(), SinkError> {
        self.out.write_all(chunk.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

/// Human-readable line for a controller message, if it warrants one
pub fn describe(message: &ControllerMessage) -> Option<String> {
    let text = match message {
        ControllerMessage::Connected { reconnected: false } => "connected to backend".to_string(),
        ControllerMessage::Connected { reconnected: true } => "reconnected to backend".to_string(),
        ControllerMessage::Disconnected {
            reason,
            reconnect_pending,
        } => {
            let reason = reason.as_deref().unwrap_or("connection closed");
            if *reconnect_pending {
                format!("disconnected ({reason}); reconnecting shortly")
            } else {
                format!("disconnected ({reason})")
            }
        }
        ControllerMessage::State {
            state: WorkflowState::AwaitingClarification,
        } => "type /clarify <text> to refine the plan, or /cancel".to_string(),
        ControllerMessage::Loading { active: true } => "working...".to_string(),
        ControllerMessage::PlanReady { plan } => format!(
            "---- plan ----\n{}\n--------------\n/accept to implement it, /clarify <text> to refine it",
            plan.trim_end()
        ),
        ControllerMessage::Notify { level, message } => {
            let tag = match level {
                NotifyLevel::Info => "info",
                NotifyLevel::Warning => "warn",
                NotifyLevel::Error => "error",
            };
            format!("[{tag}] {message}")
        }
        ControllerMessage::Rejected { request, reason } => format!("[{request}] {reason}"),
        ControllerMessage::SessionSaved { session } => {
            format!("saved session \"{}\" ({})", session.display_name, session.id)
        }
        ControllerMessage::SessionsListed { sessions, .. } => match sessions.len() {
            1 => "1 saved session".to_string(),
            n => format!("{n} saved sessions"),
        },
        ControllerMessage::State { .. }
        | ControllerMessage::Loading { active: false }
        | ControllerMessage::CodeAppended { .. }
        | ControllerMessage::PlanUpdated { .. }
        | ControllerMessage::FrameDropped { .. }
        | ControllerMessage::Stopped => return None,
    };
    Some(format!("{text}\n"))
}

/// Renders controller messages and reacts to the few that drive the client
pub struct Renderer<W> {
    out: W,
    commands: mpsc::Sender<ControllerCommand>,
    pending_prompt: Option<String>,
    awaiting_start: bool,
    busy: watch::Sender<bool>,
}

impl<W: AsyncWrite + Unpin> Renderer<W> {
    /// `initial_prompt` is submitted once the channel first opens.
    ///
    /// The returned receiver reports whether a generation is (about to be)
    /// running.
    pub fn new(
        out: W,
        commands: mpsc::Sender<ControllerCommand>,
        initial_prompt: Option<String>,
    ) -> (Self, watch::Receiver<bool>) {
        let (busy, busy_rx) = watch::channel(initial_prompt.is_some());
        let renderer = Self {
            out,
            commands,
            pending_prompt: initial_prompt,
            awaiting_start: false,
            busy,
        };
        (renderer, busy_rx)
    }

    /// Render until the controller stops
    pub async fn run(
        mut self,
        mut messages: mpsc::Receiver<ControllerMessage>,
    ) -> std::io::Result<W> {
        while let Some(message) = messages.recv().await {
            self.observe(&message).await;
            if let Some(line) = describe(&message) {
                self.out.write_all(line.as_bytes()).await?;
                self.out.flush().await?;
            }
            if message == ControllerMessage::Stopped {
                break;
            }
        }
        Ok(self.out)
    }

    async fn observe(&mut self, message: &ControllerMessage) {
        match message {
            ControllerMessage::Connected { .. } => {
                if let Some(prompt) = self.pending_prompt.take() {
                    self.awaiting_start = true;
                    let submit = ControllerCommand::Submit {
                        prompt,
                        plan_first: None,
                    };
                    if self.commands.send(submit).await.is_err() {
                        self.busy.send_replace(false);
                    }
                }
            }
            ControllerMessage::Loading { active } => {
                self.awaiting_start = false;
                self.busy.send_replace(*active);
            }
            ControllerMessage::PlanReady { .. } => {
                // The plan waits for the user; nothing runs until they answer.
                self.busy.send_replace(false);
            }
            ControllerMessage::Rejected {
                request: "submit", ..
            } if self.awaiting_start => {
                self.awaiting_start = false;
                self.busy.send_replace(false);
            }
            _ => {}
        }
    }
}
