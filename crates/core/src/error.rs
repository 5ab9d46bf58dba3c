use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure category for a single step execution.
///
/// `session_not_found`, `missing_param` and `unsupported_action` are soft
/// failures produced by the executor itself before a driver is consulted;
/// the rest originate from the bound driver or the transport underneath it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    SessionNotFound,
    MissingParam,
    UnsupportedAction,
    Driver,
    Network,
    Timeout,
    Cancelled,
    Internal,
}

/// The single tagged failure value used by step execution and the task loop.
///
/// `retryable` is the retry decision: the task loop retries a failed step
/// only when this flag is set and the retry budget is not exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Soft failure: the named session does not exist.
    pub fn session_not_found(session: &str) -> Self {
        Self::new(
            StepErrorKind::SessionNotFound,
            format!("session '{}' not found", session),
            false,
        )
    }

    /// Soft failure: a required parameter is missing or empty.
    pub fn missing_param(param: &str) -> Self {
        Self::new(
            StepErrorKind::MissingParam,
            format!("missing required parameter '{}'", param),
            false,
        )
    }

    /// Soft failure: the action is not supported by this executor.
    pub fn unsupported(action: &str) -> Self {
        Self::new(
            StepErrorKind::UnsupportedAction,
            format!("unsupported step action '{}'", action),
            false,
        )
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Driver, message, true)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Network, message, true)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StepErrorKind::Cancelled, message, false)
    }
}

/// Result of executing one step against a session.
pub type StepResult = std::result::Result<crate::types::StepOutcome, StepError>;

/// Terminal error recorded on a failed task, including which step broke.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub kind: StepErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl TaskError {
    pub fn from_step(err: StepError, step: usize) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
            retryable: err.retryable,
            step: Some(step),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Internal,
            message: message.into(),
            retryable: false,
            step: None,
        }
    }
}
