//! Backend Frames
//!
//! Inbound units delivered by the generation backend over the persistent
//! channel. Each text message on the channel carries exactly one frame:
//!
//! ```text
//! {"type": "message" | "code" | "console" | "status", "content": "..."}
//! {"error": "..."}
//! {"end_of_stream": true}
//! ```
//!
//! Frames are never re-ordered by the client. `error` and `end_of_stream`
//! are terminal markers: they close the current generation run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Discriminant of a [`Frame`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Prose from the assistant
    Message,
    /// A fragment of the generated code artifact
    Code,
    /// Output of executing the generated code
    Console,
    /// Progress line from the backend
    Status,
    /// Terminal marker: the run failed
    Error,
    /// Terminal marker: the run completed
    EndOfStream,
}

impl FrameKind {
    /// Wire name of this kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Code => "code",
            Self::Console => "console",
            Self::Status => "status",
            Self::Error => "error",
            Self::EndOfStream => "end_of_stream",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound unit from the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Prose fragment
    Message(String),
    /// Code fragment
    Code(String),
    /// Console output
    Console(String),
    /// Status line
    Status(String),
    /// Backend-reported failure
    Error(String),
    /// Successful end of the run
    EndOfStream,
}

/// Errors produced while classifying inbound frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Text was not a JSON object
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// `type` named a kind this client does not know
    #[error("unrecognized frame type: {0}")]
    UnknownKind(String),

    /// A typed frame arrived without its `content`
    #[error("{0} frame is missing its content")]
    MissingContent(FrameKind),

    /// Object carried neither `type`, `error` nor `end_of_stream`
    #[error("frame carries no type, error or end_of_stream marker")]
    Unclassified,

    /// Well-formed frame that is not valid in the current workflow phase
    #[error("{kind} frame not allowed {context}")]
    Unexpected {
        /// Kind of the offending frame
        kind: FrameKind,
        /// Where it arrived, e.g. "during planning"
        context: &'static str,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<Value>,
    error: Option<Value>,
    end_of_stream: Option<bool>,
}

/// Keepalive echoes some backends send in answer to our heartbeat
const KEEPALIVE_TYPES: [&str; 3] = ["heartbeat", "pong", "ping"];

impl Frame {
    /// Classify one text message from the channel.
    ///
    /// Returns `Ok(None)` for keepalive echoes, which carry no content and
    /// must not reach the demultiplexer.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the text is not a recognizable frame.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        if let Some(error) = raw.error {
            return Ok(Some(Self::Error(value_text(error))));
        }
        if raw.end_of_stream == Some(true) {
            return Ok(Some(Self::EndOfStream));
        }

        let Some(kind) = raw.kind else {
            return Err(ProtocolError::Unclassified);
        };
        if KEEPALIVE_TYPES.contains(&kind.as_str()) {
            return Ok(None);
        }

        let build: fn(String) -> Self = match kind.as_str() {
            "message" => Self::Message,
            "code" => Self::Code,
            "console" => Self::Console,
            "status" => Self::Status,
            "error" => Self::Error,
            "end_of_stream" => return Ok(Some(Self::EndOfStream)),
            _ => return Err(ProtocolError::UnknownKind(kind)),
        };

        match raw.content {
            Some(content) => Ok(Some(build(value_text(content)))),
            None => Err(ProtocolError::MissingContent(
                build(String::new()).kind(),
            )),
        }
    }

    /// Discriminant of this frame
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Message(_) => FrameKind::Message,
            Self::Code(_) => FrameKind::Code,
            Self::Console(_) => FrameKind::Console,
            Self::Status(_) => FrameKind::Status,
            Self::Error(_) => FrameKind::Error,
            Self::EndOfStream => FrameKind::EndOfStream,
        }
    }

    /// Text payload, if the frame carries one
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Message(text)
            | Self::Code(text)
            | Self::Console(text)
            | Self::Status(text)
            | Self::Error(text) => Some(text),
            Self::EndOfStream => None,
        }
    }

    /// Encode the frame the way the backend sends it.
    ///
    /// Used by in-process peers standing in for the backend.
    #[must_use]
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Error(text) => serde_json::json!({ "error": text }),
            Self::EndOfStream => serde_json::json!({ "end_of_stream": true }),
            other => serde_json::json!({
                "type": other.kind().as_str(),
                "content": other.content().unwrap_or_default(),
            }),
        };
        value.to_string()
    }
}

/// Strings pass through untouched; anything else keeps its JSON rendering
fn value_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
