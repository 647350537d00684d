//! Transport Traits
//!
//! Core trait definitions for the client-to-backend channel.
//!
//! A [`ChannelTransport`] opens a [`Channel`]: a pair of queues bridging the
//! controller to helper tasks that own the actual socket. Dropping the
//! channel closes the connection.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to the backend failed
    ConnectionFailed(String),
    /// Failed to send a message
    SendFailed(String),
    /// Outbound intent could not be serialized
    SerializationError(String),
    /// Connect attempt exceeded the configured timeout
    Timeout(u64),
    /// IO error from underlying transport
    IoError(std::io::Error),
    /// Transport not in expected state
    InvalidState(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::Timeout(ms) => write!(f, "Connect timed out after {ms}ms"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// What the reader side of a channel reports
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One text message from the backend
    Text(String),
    /// The channel is gone (remote close or transport error)
    Closed {
        /// Human-readable cause, if known
        reason: Option<String>,
    },
}

/// An open channel to the backend
///
/// Text pushed into `outbound` is written to the backend in order.
/// `inbound` yields every text message received, then one
/// [`ChannelEvent::Closed`] when the connection ends.
#[derive(Debug)]
pub struct Channel {
    /// Queue of text messages to send
    pub outbound: mpsc::Sender<String>,
    /// Queue of events from the backend
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the backend
///
/// Implementations handle the specific transport mechanism. They hold no
/// per-connection state: every successful [`open`](Self::open) returns a
/// fresh channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Establish a new connection
    async fn open(&mut self) -> Result<Channel, TransportError>;

    /// Endpoint description for logs
    fn endpoint(&self) -> &str;
}
