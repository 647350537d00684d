//! Workflow State Machine
//!
//! Coordinates single-phase generation and the two-phase "plan, then
//! implement" flow. Every transition returns the [`Intent`] to send (if any)
//! so the owner sends exactly what the machine decided.
//!
//! ```text
//!                submit(plan_first)                    end_of_stream
//!   Idle ────────────────────────▶ AwaitingPlan ─────────────────────▶ PlanReady
//!    │                                  ▲   ▲                          │  │   ▲
//!    │ submit(direct)        clarify()  │   └──── clarify() ───┐       │  │   │ abandon
//!    │                                  │                      │  open │  │   │
//!    │                                  └── AwaitingClarification ◀────┘  │   │
//!    ▼                                                                    │ accept
//!  Implementing ◀─────────────────────────────────────────────────────────┘
//!    │ end_of_stream                          error / transport failure
//!    ▼                                        (AwaitingPlan, Implementing)
//!  Finished                                           ▼
//!                                                   Failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::intents::Intent;
use crate::streaming::RoutingPhase;

/// Identifier of one user-initiated generation run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a fresh run id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0.simple())
    }
}

/// Workflow states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    /// No run yet
    #[default]
    Idle,
    /// A plan request is outstanding
    AwaitingPlan,
    /// A plan is ready for review
    PlanReady,
    /// The user is writing a clarification
    AwaitingClarification,
    /// An implementation or direct generation request is outstanding
    Implementing,
    /// The last run completed
    Finished,
    /// The last run failed
    Failed,
}

impl WorkflowState {
    /// Whether a request is outstanding
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::AwaitingPlan | Self::Implementing)
    }

    /// How inbound frames are routed in this state, if at all
    #[must_use]
    pub fn routing_phase(self) -> Option<RoutingPhase> {
        match self {
            Self::AwaitingPlan => Some(RoutingPhase::Planning),
            Self::Implementing => Some(RoutingPhase::Implementing),
            _ => None,
        }
    }

    /// Whether a plan is on the table
    #[must_use]
    pub fn has_plan(self) -> bool {
        matches!(self, Self::PlanReady | Self::AwaitingClarification)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingPlan => "awaiting plan",
            Self::PlanReady => "plan ready",
            Self::AwaitingClarification => "awaiting clarification",
            Self::Implementing => "implementing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rejected workflow transitions
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    /// A request is already outstanding
    #[error("a generation is already running ({0})")]
    Busy(WorkflowState),

    /// The action does not apply in the current state
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// Attempted action
        action: &'static str,
        /// State at the time
        state: WorkflowState,
    },

    /// Prompt or clarification text was blank
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Result of an `end_of_stream` in an active state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Planning finished; the plan awaits review
    PlanReady {
        /// Materialized plan text
        plan: String,
    },
    /// Implementation finished; the run should be saved
    Finished {
        /// Run that finished
        run_id: RunId,
        /// Working prompt at send time
        prompt: String,
    },
}

/// The workflow of the current session
#[derive(Debug, Default)]
pub struct Workflow {
    state: WorkflowState,
    run_id: Option<RunId>,
    prompt: String,
    plan: Option<String>,
    failure: Option<String>,
}

impl Workflow {
    /// Start in `Idle`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation.
    ///
    /// Allowed whenever no request is outstanding; an unreviewed plan is
    /// discarded.
    ///
    /// # Errors
    ///
    /// `Busy` while a request is outstanding, `Empty` for a blank prompt.
    pub fn submit(&mut self, prompt: &str, plan_first: bool) -> Result<Intent, WorkflowError> {
        if self.state.is_active() {
            return Err(WorkflowError::Busy(self.state));
        }
        if prompt.trim().is_empty() {
            return Err(WorkflowError::Empty("prompt"));
        }

        let run_id = RunId::new();
        self.run_id = Some(run_id);
        self.prompt = prompt.to_string();
        self.plan = None;
        self.failure = None;

        let intent = if plan_first {
            self.transition(WorkflowState::AwaitingPlan);
            Intent::Plan {
                prompt: self.prompt.clone(),
            }
        } else {
            self.transition(WorkflowState::Implementing);
            Intent::Generate {
                prompt: self.prompt.clone(),
            }
        };
        tracing::info!(run = %run_id, plan_first, "Generation started");
        Ok(intent)
    }

    /// Open a clarification on the ready plan
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless a plan is ready.
    pub fn begin_clarification(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::PlanReady, "open a clarification")?;
        self.transition(WorkflowState::AwaitingClarification);
        Ok(())
    }

    /// Abandon an open clarification
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless a clarification is open.
    pub fn abandon_clarification(&mut self) -> Result<(), WorkflowError> {
        self.require(WorkflowState::AwaitingClarification, "abandon a clarification")?;
        self.transition(WorkflowState::PlanReady);
        Ok(())
    }

    /// Send a clarification and re-plan.
    ///
    /// The text is appended to the working prompt.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless a plan is on the table, `Empty` for blank
    /// text.
    pub fn clarify(&mut self, text: &str) -> Result<Intent, WorkflowError> {
        if !self.state.has_plan() {
            return Err(WorkflowError::InvalidTransition {
                action: "clarify",
                state: self.state,
            });
        }
        if text.trim().is_empty() {
            return Err(WorkflowError::Empty("clarification"));
        }

        self.prompt = format!("{}\n\nClarification: {}", self.prompt, text.trim());
        self.plan = None;
        self.transition(WorkflowState::AwaitingPlan);
        Ok(Intent::Plan {
            prompt: self.prompt.clone(),
        })
    }

    /// Accept the ready plan and implement it
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless a plan is ready.
    pub fn accept_plan(&mut self) -> Result<Intent, WorkflowError> {
        self.require(WorkflowState::PlanReady, "accept the plan")?;
        let plan = self.plan.clone().unwrap_or_default();
        self.transition(WorkflowState::Implementing);
        Ok(Intent::Implement {
            prompt: self.prompt.clone(),
            plan,
        })
    }

    /// Handle `end_of_stream`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when no request is outstanding, so a duplicate
    /// end marker cannot complete a run twice.
    pub fn complete(&mut self, plan_transcript: &str) -> Result<Completion, WorkflowError> {
        match self.state {
            WorkflowState::AwaitingPlan => {
                self.plan = Some(plan_transcript.to_string());
                self.transition(WorkflowState::PlanReady);
                Ok(Completion::PlanReady {
                    plan: plan_transcript.to_string(),
                })
            }
            WorkflowState::Implementing => {
                self.transition(WorkflowState::Finished);
                Ok(Completion::Finished {
                    run_id: self.run_id.unwrap_or_default(),
                    prompt: self.prompt.clone(),
                })
            }
            state => Err(WorkflowError::InvalidTransition {
                action: "complete a run",
                state,
            }),
        }
    }

    /// Fail the outstanding request.
    ///
    /// Returns `false` (and changes nothing) if no request is outstanding.
    pub fn fail(&mut self, reason: &str) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.failure = Some(reason.to_string());
        self.transition(WorkflowState::Failed);
        true
    }

    fn require(&self, expected: WorkflowState, action: &'static str) -> Result<(), WorkflowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        tracing::debug!(
            run = ?self.run_id.map(|id| id.to_string()),
            from = %self.state,
            to = %next,
            "Workflow transition"
        );
        self.state = next;
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Working prompt, clarifications included
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Materialized plan, once planning finished
    #[must_use]
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    /// Id of the current or last run
    #[must_use]
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Reason the last run failed
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}
