pub mod executor;
pub mod remote;
pub mod session;
pub mod sim;

use async_trait::async_trait;
use workcell_core::{StepAction, StepResult};

pub use executor::StepExecutor;
pub use remote::RemoteDriver;
pub use session::{AgentSession, SessionStore, Viewport};
pub use sim::SimulatedDriver;

/// The injectable automation backend behind the step executor.
///
/// Production binds [`RemoteDriver`]; tests and demos bind
/// [`SimulatedDriver`] so scheduling and retry logic can be exercised
/// without a real browser. Implementations report failures through the
/// tagged [`workcell_core::StepError`] and must not panic.
#[async_trait]
pub trait StepDriver: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Perform one already-validated action. Browser-state actions always
    /// arrive with a session, for which the executor guarantees exclusive
    /// access for the duration of the call; `evaluate`, `http_request` and
    /// `file_op` may arrive without one (non-browsing agents).
    async fn perform(&self, session: Option<&mut AgentSession>, action: &StepAction)
        -> StepResult;
}
