//! Agent runtime: instance lifecycle, per-instance task queues, messaging
//! and the workflow engine, wired around the step executor.

pub mod comms;
pub mod manager;
pub mod queue;
pub mod templates;
pub mod workflow;

pub use comms::{CommsChannel, MessageHandler};
pub use manager::AgentRuntime;
pub use queue::{TaskQueue, TaskRunner};
pub use templates::steps_for;
