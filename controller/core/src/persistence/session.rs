//! Session records
//!
//! Shapes exchanged with the session storage API, plus the client-side
//! [`Session`] assembled from a summary and its content.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Storage-assigned session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a create-session request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDraft {
    /// Working prompt of the run
    pub prompt: String,
    /// Concatenated code fragments
    pub code: String,
    /// Everything written to the display surface
    pub console_output: String,
}

/// One entry of the session listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Storage id
    pub id: SessionId,
    /// Display name
    pub name: String,
    /// Creation time
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Stored content of a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContent {
    /// Prompt
    pub prompt: String,
    /// Code
    pub code: String,
    /// Console transcript
    pub console_output: String,
    /// Display name, when the storage returns it
    #[serde(default)]
    pub name: Option<String>,
}

/// A persisted unit of work as held in the client cache
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Storage id
    pub id: SessionId,
    /// Display name
    pub display_name: String,
    /// Prompt
    pub prompt: String,
    /// Code
    pub code: String,
    /// Console transcript
    pub console_transcript: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Combine a listing entry with its fetched content
    #[must_use]
    pub fn from_parts(summary: &SessionSummary, content: SessionContent) -> Self {
        Self {
            id: summary.id.clone(),
            display_name: content.name.unwrap_or_else(|| summary.name.clone()),
            prompt: content.prompt,
            code: content.code,
            console_transcript: content.console_output,
            created_at: summary.created_at,
        }
    }
}

/// Kind of a node in the session tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeKind {
    /// Container node
    #[serde(alias = "folder", alias = "dir")]
    Directory,
    /// Leaf node
    File,
}

/// Node of the session tree served by the storage API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Session id for leaves
    #[serde(default)]
    pub id: Option<SessionId>,
    /// Display name
    pub name: String,
    /// Node kind
    #[serde(rename = "type")]
    pub kind: TreeNodeKind,
    /// Children of a directory
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of leaves under this node, itself included
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self.kind {
            TreeNodeKind::File => 1,
            TreeNodeKind::Directory => self.children.iter().map(Self::leaf_count).sum(),
        }
    }
}

/// Accept RFC 3339 as well as the naive ISO timestamps the storage API
/// emits, reading naive values as UTC
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
