//! Step executor: runs one atomic operation against a named session.
//!
//! Every failure mode here is a soft, tagged result. Missing sessions,
//! missing parameters and unknown actions come back as `Err(StepError)`
//! with `retryable = false`; only the bound driver produces retryable
//! failures.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use workcell_core::{StepAction, StepError, StepOutcome, StepResult};

use crate::session::SessionStore;
use crate::StepDriver;

#[derive(Clone)]
pub struct StepExecutor {
    sessions: SessionStore,
    driver: Arc<dyn StepDriver>,
}

impl StepExecutor {
    pub fn new(sessions: SessionStore, driver: Arc<dyn StepDriver>) -> Self {
        Self { sessions, driver }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Execute one action. `wait` suspends only the calling step; actions
    /// that mutate browser state require a live session, the rest run with
    /// or without one.
    pub async fn execute(&self, session_id: Option<&str>, action: &StepAction) -> StepResult {
        if let Err(e) = validate(action) {
            warn!(action = action.name(), error = %e, "Step rejected before execution");
            return Err(e);
        }

        debug!(
            action = action.name(),
            session = session_id.unwrap_or("-"),
            driver = self.driver.name(),
            "Executing step"
        );

        match action {
            StepAction::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(StepOutcome::with_log(format!("waited {}ms", duration_ms)))
            }
            StepAction::Custom { name, .. } => Err(StepError::unsupported(name)),
            _ if requires_session(action) => {
                let id = match session_id {
                    Some(id) => id,
                    None => return Err(StepError::session_not_found("<none>")),
                };
                let handle = match self.sessions.get(id).await {
                    Some(handle) => handle,
                    None => return Err(StepError::session_not_found(id)),
                };
                let mut session = handle.lock().await;
                session.last_used_at = chrono::Utc::now();
                self.driver.perform(Some(&mut session), action).await
            }
            _ => match session_id {
                // Sessionless actions still get their session when one exists,
                // so evaluate can read browser state on browsing agents.
                Some(id) => match self.sessions.get(id).await {
                    Some(handle) => {
                        let mut session = handle.lock().await;
                        session.last_used_at = chrono::Utc::now();
                        self.driver.perform(Some(&mut session), action).await
                    }
                    None => Err(StepError::session_not_found(id)),
                },
                None => self.driver.perform(None, action).await,
            },
        }
    }
}

/// Browser-state actions are undefined without a session.
fn requires_session(action: &StepAction) -> bool {
    matches!(
        action,
        StepAction::Navigate { .. }
            | StepAction::Click { .. }
            | StepAction::Type { .. }
            | StepAction::Select { .. }
            | StepAction::Screenshot { .. }
            | StepAction::Extract { .. }
    )
}

fn validate(action: &StepAction) -> Result<(), StepError> {
    match action {
        StepAction::Navigate { url } if url.trim().is_empty() => {
            Err(StepError::missing_param("url"))
        }
        StepAction::Click { selector } if selector.trim().is_empty() => {
            Err(StepError::missing_param("selector"))
        }
        StepAction::Type { selector, .. } if selector.trim().is_empty() => {
            Err(StepError::missing_param("selector"))
        }
        StepAction::Select { selector, value } => {
            if selector.trim().is_empty() {
                Err(StepError::missing_param("selector"))
            } else if value.trim().is_empty() {
                Err(StepError::missing_param("value"))
            } else {
                Ok(())
            }
        }
        StepAction::Extract { selector, .. } if selector.trim().is_empty() => {
            Err(StepError::missing_param("selector"))
        }
        StepAction::Evaluate { script } if script.trim().is_empty() => {
            Err(StepError::missing_param("script"))
        }
        StepAction::HttpRequest { url, .. } if url.trim().is_empty() => {
            Err(StepError::missing_param("url"))
        }
        StepAction::FileOp { operation, path, .. } => {
            if operation.trim().is_empty() {
                Err(StepError::missing_param("operation"))
            } else if path.trim().is_empty() {
                Err(StepError::missing_param("path"))
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}
