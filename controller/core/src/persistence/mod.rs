//! Session Persistence
//!
//! Hands the result of a completed run to the storage collaborator and keeps
//! a read cache of what it returned.
//!
//! - [`SessionStore`]: the storage collaborator seam, with an HTTP client
//!   for the backend's `/projects` API and an in-memory store
//! - [`PersistenceBridge`]: save-then-load, with retention of every draft
//!   that failed to sync

mod bridge;
mod session;
mod store;

use thiserror::Error;

pub use bridge::{LoadedSession, PersistenceBridge};
pub use session::{
    Session, SessionContent, SessionDraft, SessionId, SessionSummary, TreeNode, TreeNodeKind,
};
pub use store::{HttpSessionStore, MemorySessionStore, SessionStore, DEFAULT_API_BASE};

/// Errors talking to the storage collaborator
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Transport-level HTTP failure
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The storage answered with an error status
    #[error("storage returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The requested session does not exist
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The storage refused the request
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Retry was requested with nothing pending
    #[error("no unsaved session to retry")]
    NothingToRetry,

    /// The session was stored but its canonical content could not be read back
    #[error("saved as {}, but could not reload it: {source}", .summary.id)]
    Reload {
        /// Record the storage created
        summary: SessionSummary,
        /// Why the fetch failed
        source: Box<PersistenceError>,
    },
}

impl PersistenceError {
    /// Whether the draft is still unsaved after this error
    #[must_use]
    pub fn draft_retained(&self) -> bool {
        !matches!(self, Self::Reload { .. } | Self::NothingToRetry)
    }
}
