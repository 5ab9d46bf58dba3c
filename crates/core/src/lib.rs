pub mod config;
pub mod error;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{Error, Result, StepError, StepErrorKind, StepResult, TaskError};
pub use types::*;
