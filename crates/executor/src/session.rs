//! Session store: one mutable session record per browsing agent instance.
//!
//! Records are owned exclusively by the runtime and referenced elsewhere
//! only by session id. Each record sits behind its own lock, so one step
//! call at a time touches a given session while unrelated sessions proceed
//! concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Mutable per-instance browsing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: String,
    pub instance_id: String,
    pub current_url: Option<String>,
    pub cookies: HashMap<String, String>,
    pub local_state: HashMap<String, Value>,
    pub viewport: Viewport,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl AgentSession {
    fn new(instance_id: &str, viewport: Viewport) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            current_url: None,
            cookies: HashMap::new(),
            local_state: HashMap::new(),
            viewport,
            created_at: now,
            last_used_at: now,
        }
    }
}

type SessionHandle = Arc<Mutex<AgentSession>>;

/// In-memory keyed store of live sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh session for an instance and return its id.
    pub async fn open(&self, instance_id: &str, viewport: Viewport) -> String {
        let session = AgentSession::new(instance_id, viewport);
        let id = session.id.clone();
        info!(session = %id, instance = %instance_id, "Opening session");
        let mut sessions = self.sessions.lock().await;
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    /// Look up a session handle by id.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).cloned()
    }

    /// Snapshot of a session's current state.
    pub async fn snapshot(&self, id: &str) -> Option<AgentSession> {
        let handle = self.get(id).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Release a session. A no-op when the id is unknown.
    pub async fn close(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(id).is_some() {
            debug!(session = %id, "Closed session");
        }
    }

    pub async fn list(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
