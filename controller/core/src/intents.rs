//! Outbound Intents
//!
//! Everything the client sends over the persistent channel. A direct
//! generation request is the raw prompt text; the two-phase workflow uses
//! small JSON envelopes; the heartbeat is a fixed object.

use serde::{Deserialize, Serialize};

/// One outbound unit on the persistent channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Single-phase generation, sent as the bare prompt text
    Generate {
        /// Prompt as typed by the user
        prompt: String,
    },
    /// Ask the backend for a plan only
    Plan {
        /// Working prompt including clarifications
        prompt: String,
    },
    /// Implement an accepted plan
    Implement {
        /// Working prompt including clarifications
        prompt: String,
        /// Plan text the user accepted
        plan: String,
    },
    /// Keepalive, no reply expected
    Heartbeat,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
enum Envelope {
    Plan { prompt: String },
    Implement { prompt: String, plan: String },
}

#[derive(Serialize, Deserialize)]
struct Keepalive {
    #[serde(rename = "type")]
    kind: String,
}

/// Wire text of the heartbeat
pub const HEARTBEAT_TEXT: &str = r#"{"type":"heartbeat"}"#;

impl Intent {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generate { .. } => "generate",
            Self::Plan { .. } => "plan",
            Self::Implement { .. } => "implement",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Encode for the wire
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Generate { prompt } => Ok(prompt.clone()),
            Self::Plan { prompt } => serde_json::to_string(&Envelope::Plan {
                prompt: prompt.clone(),
            }),
            Self::Implement { prompt, plan } => serde_json::to_string(&Envelope::Implement {
                prompt: prompt.clone(),
                plan: plan.clone(),
            }),
            Self::Heartbeat => Ok(HEARTBEAT_TEXT.to_string()),
        }
    }

    /// Interpret text received by a backend peer.
    ///
    /// Anything that is not a known envelope is a direct generation prompt,
    /// matching how the backend treats it.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        if let Ok(envelope) = serde_json::from_str::<Envelope>(text) {
            return match envelope {
                Envelope::Plan { prompt } => Self::Plan { prompt },
                Envelope::Implement { prompt, plan } => Self::Implement { prompt, plan },
            };
        }
        match serde_json::from_str::<Keepalive>(text) {
            Ok(keepalive) if keepalive.kind == "heartbeat" => Self::Heartbeat,
            _ => Self::Generate {
                prompt: text.to_string(),
            },
        }
    }
}
