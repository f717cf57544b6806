//! In-memory conversation history.
//!
//! Sessions live for the lifetime of the process. Each append takes the write
//! lock on its own, so concurrent requests to one session interleave at turn
//! granularity; reading the history and appending to it are separate steps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Only used for the instruction at the head of a context window
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Session id → ordered turns.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, creating the session if needed.
    pub async fn append(&self, session_id: &str, turn: Turn) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.to_string()).or_default().push(turn);
    }

    /// Snapshot of a session's turns in creation order. Empty if unknown.
    pub async fn get_context(&self, session_id: &str) -> Vec<Turn> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Remove a session. Returns whether it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id).is_some()
    }

    /// Number of turns in a session.
    pub async fn turn_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map_or(0, Vec::len)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
