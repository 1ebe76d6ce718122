use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::AgentError;
use crate::events::RuntimeMessage;

/// Identity of a checkpointed conversation thread. Passed through to the
/// runtime unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub thread_id: String,
    pub user_id: String,
    pub organization_id: String,
}

impl SessionKey {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }
}

/// Persists conversation threads so a run can pause on an interrupt and
/// pick up again later.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Save a checkpoint of the thread.
    async fn checkpoint(&self, thread_id: &str, state: &SessionState) -> Result<(), AgentError>;

    /// Load the most recent checkpoint for a thread.
    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>, AgentError>;
}

/// Everything needed to continue a thread. Opaque to everyone but the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub key: SessionKey,
    pub messages: Vec<RuntimeMessage>,
    /// Clarification call waiting for the human's answers.
    pub pending_interrupt: Option<PendingToolCall>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SessionState {
    pub fn new(key: SessionKey) -> Self {
        let now = chrono::Utc::now();
        Self {
            key,
            messages: Vec::new(),
            pending_interrupt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

// --- NoSessionManager ---

/// No persistence. Every call starts a new thread.
pub struct NoSessionManager;

#[async_trait]
impl SessionManager for NoSessionManager {
    async fn checkpoint(&self, _: &str, _: &SessionState) -> Result<(), AgentError> {
        Ok(())
    }

    async fn load(&self, _: &str) -> Result<Option<SessionState>, AgentError> {
        Ok(None)
    }
}

// --- MemorySessionManager ---

/// Keeps threads in process memory. Lost on restart.
#[derive(Default)]
pub struct MemorySessionManager {
    threads: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionManager for MemorySessionManager {
    async fn checkpoint(&self, thread_id: &str, state: &SessionState) -> Result<(), AgentError> {
        self.threads
            .lock()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>, AgentError> {
        Ok(self.threads.lock().await.get(thread_id).cloned())
    }
}

// --- FileSessionManager ---

/// Saves each thread to `<dir>/<thread_id>.json`.
pub struct FileSessionManager {
    dir: PathBuf,
}

impl FileSessionManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, thread_id: &str) -> Result<PathBuf, AgentError> {
        if thread_id.is_empty() || thread_id.contains(['/', '\\']) || thread_id.starts_with('.') {
            return Err(AgentError::Session(format!(
                "invalid thread id: {thread_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }
}

#[async_trait]
impl SessionManager for FileSessionManager {
    async fn checkpoint(&self, thread_id: &str, state: &SessionState) -> Result<(), AgentError> {
        let path = self.path(thread_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Session(e.to_string()))?;
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| AgentError::Session(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| AgentError::Session(e.to_string()))?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<SessionState>, AgentError> {
        let path = self.path(thread_id)?;
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let state: SessionState = serde_json::from_str(&json)
                    .map_err(|e| AgentError::Session(e.to_string()))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Session(e.to_string())),
        }
    }
}
