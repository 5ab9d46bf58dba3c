//! Per-instance priority task queue with a wave-based drain loop.
//!
//! Draining pulls up to `concurrency` tasks per wave and awaits the whole
//! wave before pulling the next. A long task therefore holds its wave open
//! even when shorter siblings finish first; that is deliberate, reproducible
//! behavior, not an accident of scheduling.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use workcell_core::{AgentTask, Result, TaskError, TaskStatus};

/// Executes one dequeued task to completion.
///
/// `run` is expected to absorb ordinary task failures into the task itself
/// (status, error, metrics); an `Err` from it means the runner could not do
/// even that, and the queue downgrades it to a failed task. `finish`
/// archives the task wherever finished tasks are observed.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &mut AgentTask) -> Result<()>;
    async fn finish(&self, task: AgentTask);
}

struct QueueState {
    tasks: VecDeque<AgentTask>,
    processing: bool,
}

#[derive(Clone)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,
    concurrency: usize,
}

impl TaskQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                tasks: VecDeque::new(),
                processing: false,
            })),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Insert by priority. Among equal priorities arrival order is kept: the
    /// insertion point is the first task of strictly lower priority.
    pub async fn enqueue(&self, mut task: AgentTask) {
        task.status = TaskStatus::Queued;
        let mut state = self.state.lock().await;
        let position = state
            .tasks
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(state.tasks.len());
        debug!(task = %task.id, priority = ?task.priority, position, "Enqueued task");
        state.tasks.insert(position, task);
    }

    /// Remove and return the head task.
    pub async fn dequeue(&self) -> Option<AgentTask> {
        let mut state = self.state.lock().await;
        state.tasks.pop_front()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot a queued task by id.
    pub async fn find(&self, task_id: &str) -> Option<AgentTask> {
        let state = self.state.lock().await;
        state.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Drain the queue in waves. Re-entrant calls on a queue that is already
    /// processing are a no-op; the active drain picks up everything enqueued
    /// while it runs.
    pub async fn process(&self, runner: Arc<dyn TaskRunner>) {
        {
            let mut state = self.state.lock().await;
            if state.processing {
                debug!("Queue already processing, ignoring re-entrant drain");
                return;
            }
            state.processing = true;
        }

        loop {
            let wave: Vec<AgentTask> = {
                let mut state = self.state.lock().await;
                let take = self.concurrency.min(state.tasks.len());
                state.tasks.drain(..take).collect()
            };

            if wave.is_empty() {
                let mut state = self.state.lock().await;
                if state.tasks.is_empty() {
                    state.processing = false;
                    break;
                }
                // Raced with an enqueue between the drain above and this
                // check; keep the flag and go around again.
                continue;
            }

            debug!(wave = wave.len(), "Draining wave");
            let runs = wave.into_iter().map(|mut task| {
                let runner = runner.clone();
                async move {
                    if let Err(e) = runner.run(&mut task).await {
                        warn!(task = %task.id, error = %e, "Task runner failed, marking task failed");
                        task.status = TaskStatus::Failed;
                        task.error = Some(TaskError::internal(e.to_string()));
                    }
                    runner.finish(task).await;
                }
            });
            join_all(runs).await;
        }
    }
}
