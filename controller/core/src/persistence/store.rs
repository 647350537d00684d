//! Storage collaborators
//!
//! [`HttpSessionStore`] talks to the backend's project API:
//!
//! | Operation        | Request                                   |
//! |------------------|-------------------------------------------|
//! | list sessions    | `GET  {base}/`                            |
//! | session tree     | `GET  {base}/tree`                        |
//! | create session   | `POST {base}/?project_name=…` with draft  |
//! | fetch session    | `GET  {base}/{id}`                        |
//!
//! [`MemorySessionStore`] keeps everything in process; it backs embedding
//! and tests, and can be told to fail.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Response, StatusCode};

use super::session::{
    SessionContent, SessionDraft, SessionId, SessionSummary, TreeNode, TreeNodeKind,
};
use super::PersistenceError;

/// Default base URL of the session storage API
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/projects";

/// The external storage collaborator
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a draft; returns the canonical record
    async fn create_session(
        &self,
        draft: &SessionDraft,
        name: Option<&str>,
    ) -> Result<SessionSummary, PersistenceError>;

    /// Fetch the stored content of a session
    async fn fetch_session(&self, id: &SessionId) -> Result<SessionContent, PersistenceError>;

    /// List known sessions
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, PersistenceError>;

    /// Hierarchical view of known sessions
    async fn session_tree(&self) -> Result<Vec<TreeNode>, PersistenceError>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn create_session(
        &self,
        draft: &SessionDraft,
        name: Option<&str>,
    ) -> Result<SessionSummary, PersistenceError> {
        (**self).create_session(draft, name).await
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionContent, PersistenceError> {
        (**self).fetch_session(id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        (**self).list_sessions().await
    }

    async fn session_tree(&self) -> Result<Vec<TreeNode>, PersistenceError> {
        (**self).session_tree().await
    }
}

// =============================================================================
// HTTP store
// =============================================================================

/// Client for the backend's project API
pub struct HttpSessionStore {
    base: String,
    client: reqwest::Client,
}

impl HttpSessionStore {
    /// Create a client for `base` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: &str, timeout: Duration) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// Base URL in use
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }
}

async fn ensure_success(response: Response) -> Result<Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PersistenceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn create_session(
        &self,
        draft: &SessionDraft,
        name: Option<&str>,
    ) -> Result<SessionSummary, PersistenceError> {
        let mut request = self.client.post(self.url("")).json(draft);
        if let Some(name) = name {
            request = request.query(&[("project_name", name)]);
        }
        let response = ensure_success(request.send().await?).await?;
        let summary: SessionSummary = response.json().await?;
        tracing::info!(id = %summary.id, name = %summary.name, "Session created");
        Ok(summary)
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionContent, PersistenceError> {
        let response = self.client.get(self.url(&id.0)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PersistenceError::NotFound(id.clone()));
        }
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        let response = ensure_success(self.client.get(self.url("")).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn session_tree(&self) -> Result<Vec<TreeNode>, PersistenceError> {
        let response = ensure_success(self.client.get(self.url("tree")).send().await?).await?;
        Ok(response.json().await?)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-process store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<(SessionSummary, SessionContent)>>,
    fail_creates: AtomicU32,
    fail_lists: AtomicU32,
    fail_fetches: AtomicU32,
    create_calls: AtomicU64,
}

impl MemorySessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` create requests
    pub fn fail_next_creates(&self, count: u32) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` list requests
    pub fn fail_next_lists(&self, count: u32) {
        self.fail_lists.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` fetch requests
    pub fn fail_next_fetches(&self, count: u32) {
        self.fail_fetches.store(count, Ordering::SeqCst);
    }

    /// Create requests received, failed ones included
    #[must_use]
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Contents stored so far, oldest first
    #[must_use]
    pub fn stored(&self) -> Vec<SessionContent> {
        self.sessions
            .lock()
            .iter()
            .map(|(_, content)| content.clone())
            .collect()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        draft: &SessionDraft,
        name: Option<&str>,
    ) -> Result<SessionSummary, PersistenceError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Self::take_failure(&self.fail_creates) {
            return Err(PersistenceError::Unavailable("store offline".to_string()));
        }

        let created_at = Utc::now();
        let id = SessionId(format!(
            "session-{}-{call}",
            created_at.format("%Y%m%d%H%M%S")
        ));
        let summary = SessionSummary {
            name: name.map_or_else(|| id.0.clone(), str::to_string),
            id,
            created_at,
        };
        let content = SessionContent {
            prompt: draft.prompt.clone(),
            code: draft.code.clone(),
            console_output: draft.console_output.clone(),
            name: Some(summary.name.clone()),
        };
        self.sessions.lock().push((summary.clone(), content));
        Ok(summary)
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionContent, PersistenceError> {
        if Self::take_failure(&self.fail_fetches) {
            return Err(PersistenceError::Unavailable("store offline".to_string()));
        }
        self.sessions
            .lock()
            .iter()
            .find(|(summary, _)| &summary.id == id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| PersistenceError::NotFound(id.clone()))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, PersistenceError> {
        if Self::take_failure(&self.fail_lists) {
            return Err(PersistenceError::Unavailable("store offline".to_string()));
        }
        Ok(self
            .sessions
            .lock()
            .iter()
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn session_tree(&self) -> Result<Vec<TreeNode>, PersistenceError> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .map(|(summary, _)| TreeNode {
                id: Some(summary.id.clone()),
                name: summary.name.clone(),
                kind: TreeNodeKind::File,
                children: Vec::new(),
            })
            .collect())
    }
}
