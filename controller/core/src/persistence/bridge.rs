//! Session Persistence Bridge
//!
//! `save` packages a run into a [`SessionDraft`], hands it to the store and,
//! on success, `load`s the canonical record: fetches its content and
//! refreshes the listing and tree caches. A failed save is non-fatal: every
//! draft that did not reach the store is kept, oldest first, until
//! [`PersistenceBridge::retry`] gets it there. A draft that was stored but
//! could not be read back is not retried; the error is
//! [`PersistenceError::Reload`].

use std::collections::VecDeque;

use super::session::{Session, SessionDraft, SessionSummary, TreeNode};
use super::store::SessionStore;
use super::PersistenceError;

/// Result of a successful save or load
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedSession {
    /// The canonical session
    pub session: Session,
    /// Refreshed listing
    pub sessions: Vec<SessionSummary>,
    /// Refreshed tree
    pub tree: Vec<TreeNode>,
}

#[derive(Clone, Debug)]
struct PendingSave {
    draft: SessionDraft,
    name: Option<String>,
}

/// Bridge between the controller and the storage collaborator
pub struct PersistenceBridge<S: SessionStore> {
    store: S,
    unsynced: VecDeque<PendingSave>,
    sessions: Vec<SessionSummary>,
    tree: Vec<TreeNode>,
    current: Option<Session>,
    saves_requested: u64,
}

impl<S: SessionStore> PersistenceBridge<S> {
    /// Create a bridge over a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            unsynced: VecDeque::new(),
            sessions: Vec::new(),
            tree: Vec::new(),
            current: None,
            saves_requested: 0,
        }
    }

    /// Save a run and load the canonical record back.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the draft is then queued behind any older
    /// unsaved drafts for [`retry`](Self::retry). `Reload` means the draft
    /// was stored and only the read-back failed.
    pub async fn save(
        &mut self,
        draft: SessionDraft,
        name: Option<String>,
    ) -> Result<LoadedSession, PersistenceError> {
        self.saves_requested += 1;
        let pending = PendingSave { draft, name };
        let created = self
            .store
            .create_session(&pending.draft, pending.name.as_deref())
            .await;
        match created {
            Ok(summary) => self.reload(summary).await,
            Err(e) => {
                self.unsynced.push_back(pending);
                tracing::warn!(
                    error = %e,
                    unsynced = self.unsynced.len(),
                    "Session save failed, keeping draft"
                );
                Err(e)
            }
        }
    }

    /// Retry the oldest draft that failed to sync
    ///
    /// # Errors
    ///
    /// `NothingToRetry` without a pending draft, otherwise as for `save`; a
    /// draft that fails again stays at the front of the queue.
    pub async fn retry(&mut self) -> Result<LoadedSession, PersistenceError> {
        let pending = self
            .unsynced
            .pop_front()
            .ok_or(PersistenceError::NothingToRetry)?;
        let created = self
            .store
            .create_session(&pending.draft, pending.name.as_deref())
            .await;
        match created {
            Ok(summary) => self.reload(summary).await,
            Err(e) => {
                self.unsynced.push_front(pending);
                tracing::warn!(
                    error = %e,
                    unsynced = self.unsynced.len(),
                    "Session retry failed"
                );
                Err(e)
            }
        }
    }

    async fn reload(&mut self, summary: SessionSummary) -> Result<LoadedSession, PersistenceError> {
        match self.load(&summary).await {
            Ok(loaded) => Ok(loaded),
            Err(e) => {
                tracing::warn!(id = %summary.id, error = %e, "Session stored but not reloaded");
                if let Err(list_err) = self.refresh_listing().await {
                    tracing::warn!(error = %list_err, "Session listing refresh failed");
                }
                Err(PersistenceError::Reload {
                    summary,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Fetch a session's content and refresh the caches
    ///
    /// # Errors
    ///
    /// Returns the store's error if the content cannot be fetched. Listing
    /// refresh failures only leave the caches stale.
    pub async fn load(&mut self, summary: &SessionSummary) -> Result<LoadedSession, PersistenceError> {
        let content = self.store.fetch_session(&summary.id).await?;
        let session = Session::from_parts(summary, content);
        self.current = Some(session.clone());

        if let Err(e) = self.refresh_listing().await {
            tracing::warn!(error = %e, "Session listing refresh failed");
        }

        tracing::info!(id = %session.id, name = %session.display_name, "Session loaded");
        Ok(LoadedSession {
            session,
            sessions: self.sessions.clone(),
            tree: self.tree.clone(),
        })
    }

    /// Re-query the listing and tree
    ///
    /// # Errors
    ///
    /// Returns the store's error; caches are left untouched then.
    pub async fn refresh_listing(&mut self) -> Result<&[SessionSummary], PersistenceError> {
        let sessions = self.store.list_sessions().await?;
        let tree = self.store.session_tree().await?;
        self.sessions = sessions;
        self.tree = tree;
        Ok(&self.sessions)
    }

    /// Oldest draft awaiting a successful retry
    #[must_use]
    pub fn unsynced(&self) -> Option<&SessionDraft> {
        self.unsynced.front().map(|pending| &pending.draft)
    }

    /// Drafts awaiting a successful retry
    #[must_use]
    pub fn unsynced_count(&self) -> usize {
        self.unsynced.len()
    }

    /// Cached listing
    #[must_use]
    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    /// Cached tree
    #[must_use]
    pub fn tree(&self) -> &[TreeNode] {
        &self.tree
    }

    /// Last loaded session
    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Number of `save` calls
    #[must_use]
    pub fn saves_requested(&self) -> u64 {
        self.saves_requested
    }

    /// The underlying store
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}
