//! Agent instance manager: the runtime core.
//!
//! `AgentRuntime` is constructed explicitly at process start and passed by
//! clone into every consumer; there is no process-wide instance. It owns
//! the arena stores (definitions, instances, queues, sessions, mailboxes,
//! workflows) and everything else refers to records by opaque id.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use workcell_core::{
    AgentDefinition, AgentInstance, AgentMessage, AgentStatus, AgentTask, Error, MessageKind,
    Result, RuntimeConfig, StepErrorKind, StepStatus, TaskError, TaskSpec, TaskStatus, Workflow,
};
use workcell_executor::{
    RemoteDriver, SessionStore, SimulatedDriver, StepDriver, StepExecutor, Viewport,
};

use crate::comms::{CommsChannel, MessageHandler};
use crate::queue::{TaskQueue, TaskRunner};
use crate::templates::steps_for;

#[derive(Clone)]
pub struct AgentRuntime {
    pub(crate) config: Arc<RuntimeConfig>,
    pub(crate) executor: StepExecutor,
    /// Definitions keep registration order; workflow steps resolve an agent
    /// type to the first matching definition.
    pub(crate) definitions: Arc<Mutex<Vec<AgentDefinition>>>,
    pub(crate) instances: Arc<Mutex<HashMap<String, AgentInstance>>>,
    pub(crate) queues: Arc<Mutex<HashMap<String, TaskQueue>>>,
    pub(crate) comms: CommsChannel,
    pub(crate) workflows: Arc<Mutex<HashMap<String, Workflow>>>,
}

impl AgentRuntime {
    /// Build a runtime with the driver selected by the config.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let driver: Arc<dyn StepDriver> = match config.driver.kind {
            workcell_core::config::DriverKind::Simulated => Arc::new(SimulatedDriver::new()),
            workcell_core::config::DriverKind::Remote => {
                let endpoint = config.driver.endpoint.as_deref().ok_or_else(|| {
                    Error::Config("remote driver requires driver.endpoint".to_string())
                })?;
                Arc::new(RemoteDriver::new(
                    endpoint,
                    Duration::from_millis(config.driver.request_timeout_ms),
                ))
            }
        };
        Ok(Self::with_driver(config, driver))
    }

    /// Build a runtime around an injected driver (tests, embedders).
    pub fn with_driver(config: RuntimeConfig, driver: Arc<dyn StepDriver>) -> Self {
        let sessions = SessionStore::new();
        Self {
            config: Arc::new(config),
            executor: StepExecutor::new(sessions, driver),
            definitions: Arc::new(Mutex::new(Vec::new())),
            instances: Arc::new(Mutex::new(HashMap::new())),
            queues: Arc::new(Mutex::new(HashMap::new())),
            comms: CommsChannel::new(),
            workflows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        self.executor.sessions()
    }

    // ---- definitions ----

    /// Register an immutable agent definition. Duplicate ids are rejected.
    pub async fn register_agent(&self, definition: AgentDefinition) -> Result<()> {
        let mut definitions = self.definitions.lock().await;
        if definitions.iter().any(|d| d.id == definition.id) {
            return Err(Error::Config(format!(
                "agent definition '{}' already registered",
                definition.id
            )));
        }
        info!(definition = %definition.id, agent_type = ?definition.agent_type, "Registered agent definition");
        definitions.push(definition);
        Ok(())
    }

    pub async fn agent_definitions(&self) -> Vec<AgentDefinition> {
        self.definitions.lock().await.clone()
    }

    pub(crate) async fn definition(&self, id: &str) -> Option<AgentDefinition> {
        let definitions = self.definitions.lock().await;
        definitions.iter().find(|d| d.id == id).cloned()
    }

    pub(crate) async fn definition_by_type(
        &self,
        agent_type: workcell_core::AgentType,
    ) -> Option<AgentDefinition> {
        let definitions = self.definitions.lock().await;
        definitions
            .iter()
            .find(|d| d.agent_type == agent_type)
            .cloned()
    }

    // ---- instances ----

    /// Spawn a live instance from a definition. A session is attached only
    /// when the definition declares the browsing capability.
    pub async fn spawn_agent(&self, definition_id: &str, user_id: &str) -> Result<AgentInstance> {
        let definition = self
            .definition(definition_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("agent definition '{}'", definition_id)))?;

        let mut instance = AgentInstance::new(definition_id, user_id);
        if definition.can_browse() {
            let viewport = Viewport {
                width: self.config.session.viewport_width,
                height: self.config.session.viewport_height,
            };
            instance.session_id = Some(self.sessions().open(&instance.id, viewport).await);
        }

        let concurrency = definition
            .limits
            .max_concurrent_tasks
            .unwrap_or(self.config.queue.concurrency);
        {
            let mut queues = self.queues.lock().await;
            queues.insert(instance.id.clone(), TaskQueue::new(concurrency));
        }

        instance.status = AgentStatus::Idle;
        info!(
            instance = %instance.id,
            definition = %definition_id,
            user = %user_id,
            session = instance.session_id.as_deref().unwrap_or("-"),
            "Spawned agent instance"
        );

        let mut instances = self.instances.lock().await;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    /// Terminate an instance: mark it terminated, release its session, drop
    /// it from the registry. An in-flight step is not interrupted; the task
    /// loop notices the missing instance before the next step and fails the
    /// task as cancelled.
    pub async fn terminate_agent(&self, instance_id: &str) -> Result<()> {
        let instance = {
            let mut instances = self.instances.lock().await;
            let mut instance = instances
                .remove(instance_id)
                .ok_or_else(|| Error::NotFound(format!("agent instance '{}'", instance_id)))?;
            instance.status = AgentStatus::Terminated;
            instance
        };
        if let Some(session_id) = &instance.session_id {
            self.sessions().close(session_id).await;
        }
        {
            let mut queues = self.queues.lock().await;
            queues.remove(instance_id);
        }
        self.comms.remove_destination(instance_id).await;
        info!(instance = %instance_id, "Terminated agent instance");
        Ok(())
    }

    pub async fn get_agent(&self, instance_id: &str) -> Option<AgentInstance> {
        let instances = self.instances.lock().await;
        instances.get(instance_id).cloned()
    }

    pub async fn list_agents(&self, user_id: Option<&str>) -> Vec<AgentInstance> {
        let instances = self.instances.lock().await;
        let mut list: Vec<AgentInstance> = instances
            .values()
            .filter(|i| user_id.map_or(true, |u| i.user_id == u))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.spawned_at.cmp(&b.spawned_at));
        list
    }

    /// Park an idle instance so it accepts no new tasks.
    pub async fn pause_agent(&self, instance_id: &str) -> Result<()> {
        self.flip_status(instance_id, AgentStatus::Idle, AgentStatus::Paused)
            .await
    }

    pub async fn resume_agent(&self, instance_id: &str) -> Result<()> {
        self.flip_status(instance_id, AgentStatus::Paused, AgentStatus::Idle)
            .await
    }

    async fn flip_status(
        &self,
        instance_id: &str,
        expected: AgentStatus,
        next: AgentStatus,
    ) -> Result<()> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| Error::NotFound(format!("agent instance '{}'", instance_id)))?;
        if instance.status != expected {
            return Err(Error::Other(format!(
                "instance '{}' is {}, expected {}",
                instance_id, instance.status, expected
            )));
        }
        instance.status = next;
        Ok(())
    }

    // ---- tasks ----

    /// Build a task from the spec's step template, enqueue it and kick the
    /// drain loop. Returns the constructed task; completion is observed via
    /// `get_agent` / `get_task` polling.
    pub async fn execute_task(&self, instance_id: &str, spec: TaskSpec) -> Result<AgentTask> {
        {
            let instances = self.instances.lock().await;
            let instance = instances
                .get(instance_id)
                .ok_or_else(|| Error::NotFound(format!("agent instance '{}'", instance_id)))?;
            if instance.status == AgentStatus::Paused {
                return Err(Error::Queue(format!(
                    "instance '{}' is paused",
                    instance_id
                )));
            }
        }

        let steps = steps_for(&spec);
        let task = AgentTask::new(instance_id, &spec.kind, spec.priority, steps);
        debug!(
            instance = %instance_id,
            task = %task.id,
            kind = %task.kind,
            steps = task.steps.len(),
            "Submitting task"
        );

        let queue = {
            let queues = self.queues.lock().await;
            queues
                .get(instance_id)
                .cloned()
                .ok_or_else(|| Error::Queue(format!("no queue for instance '{}'", instance_id)))?
        };
        queue.enqueue(task.clone()).await;

        let runner = Arc::new(InstanceRunner {
            runtime: self.clone(),
            instance_id: instance_id.to_string(),
        });
        tokio::spawn(async move {
            queue.process(runner).await;
        });

        Ok(task)
    }

    /// Observe a task wherever it currently lives: running, archived in
    /// history, or still queued.
    pub async fn get_task(&self, instance_id: &str, task_id: &str) -> Option<AgentTask> {
        {
            let instances = self.instances.lock().await;
            if let Some(instance) = instances.get(instance_id) {
                if let Some(current) = &instance.current_task {
                    if current.id == task_id {
                        return Some(current.clone());
                    }
                }
                if let Some(task) = instance.task_history.iter().find(|t| t.id == task_id) {
                    return Some(task.clone());
                }
            }
        }
        let queue = {
            let queues = self.queues.lock().await;
            queues.get(instance_id).cloned()
        }?;
        queue.find(task_id).await
    }

    // ---- messaging ----

    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        kind: MessageKind,
        payload: Value,
    ) -> AgentMessage {
        self.comms.send(from, to, kind, payload).await
    }

    pub async fn broadcast_message(
        &self,
        from: &str,
        to: &[String],
        payload: Value,
    ) -> Vec<AgentMessage> {
        self.comms.broadcast(from, to, payload).await
    }

    pub async fn handoff_task(&self, from: &str, to: &str, task: &TaskSpec) -> Result<AgentMessage> {
        self.comms.handoff(from, to, task).await
    }

    pub async fn get_messages(
        &self,
        agent_id: &str,
        unacknowledged_only: bool,
    ) -> Vec<AgentMessage> {
        self.comms.messages(agent_id, unacknowledged_only).await
    }

    pub async fn acknowledge_message(&self, message_id: &str, agent_id: &str) -> Result<()> {
        self.comms.acknowledge(message_id, agent_id).await
    }

    pub async fn subscribe_to_messages(&self, agent_id: &str, handler: MessageHandler) {
        self.comms.subscribe(agent_id, handler).await
    }

    pub(crate) async fn retry_limits(&self, instance: &AgentInstance) -> (u32, u64) {
        match self.definition(&instance.definition_id).await {
            Some(definition) => (
                definition
                    .limits
                    .retry_attempts
                    .unwrap_or(self.config.retry.attempts),
                definition
                    .limits
                    .retry_delay_ms
                    .unwrap_or(self.config.retry.delay_ms),
            ),
            None => (self.config.retry.attempts, self.config.retry.delay_ms),
        }
    }
}

/// Runs one task of one instance: the step loop with retries, metrics and
/// the idle-after-every-task contract.
struct InstanceRunner {
    runtime: AgentRuntime,
    instance_id: String,
}

impl InstanceRunner {
    /// True when the instance disappeared or was terminated mid-task.
    async fn cancelled(&self) -> bool {
        let instances = self.runtime.instances.lock().await;
        match instances.get(&self.instance_id) {
            Some(instance) => instance.status == AgentStatus::Terminated,
            None => true,
        }
    }

    /// Refresh the instance's stored current task so `get_agent`/`get_task`
    /// observers see live step and retry progress, not the submission-time
    /// snapshot.
    async fn publish_progress(&self, task: &AgentTask) {
        let mut instances = self.runtime.instances.lock().await;
        if let Some(instance) = instances.get_mut(&self.instance_id) {
            instance.current_task = Some(task.clone());
        }
    }
}

#[async_trait]
impl TaskRunner for InstanceRunner {
    async fn run(&self, task: &mut AgentTask) -> Result<()> {
        let rt = &self.runtime;

        let snapshot = {
            let instances = rt.instances.lock().await;
            instances.get(&self.instance_id).cloned().ok_or_else(|| {
                Error::NotFound(format!("agent instance '{}'", self.instance_id))
            })?
        };
        let session_id = snapshot.session_id.clone();
        let (attempts, delay_ms) = rt.retry_limits(&snapshot).await;

        let started = Instant::now();
        task.status = TaskStatus::Running;
        {
            let mut instances = rt.instances.lock().await;
            let instance = instances.get_mut(&self.instance_id).ok_or_else(|| {
                Error::NotFound(format!("agent instance '{}'", self.instance_id))
            })?;
            instance.status = AgentStatus::Running;
            instance.current_task = Some(task.clone());
        }
        info!(instance = %self.instance_id, task = %task.id, kind = %task.kind, "Task started");

        let mut failure: Option<TaskError> = None;
        while task.current_step < task.steps.len() {
            if self.cancelled().await {
                let index = task.current_step;
                task.steps[index].status = StepStatus::Failed;
                failure = Some(TaskError {
                    kind: StepErrorKind::Cancelled,
                    message: "instance terminated during execution".to_string(),
                    retryable: false,
                    step: Some(index),
                });
                break;
            }

            let index = task.current_step;
            task.steps[index].status = StepStatus::Running;
            let action = task.steps[index].action.clone();

            match rt.executor.execute(session_id.as_deref(), &action).await {
                Ok(outcome) => {
                    task.steps[index].status = StepStatus::Completed;
                    task.steps[index].result = Some(outcome);
                    task.current_step += 1;
                    self.publish_progress(task).await;
                }
                Err(err) if err.retryable && task.retry_count < attempts => {
                    task.retry_count += 1;
                    self.publish_progress(task).await;
                    warn!(
                        instance = %self.instance_id,
                        task = %task.id,
                        step = index,
                        retry = task.retry_count,
                        error = %err,
                        "Step failed, retrying same step"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => {
                    task.steps[index].status = StepStatus::Failed;
                    warn!(
                        instance = %self.instance_id,
                        task = %task.id,
                        step = index,
                        error = %err,
                        "Step failed terminally"
                    );
                    failure = Some(TaskError::from_step(err, index));
                    break;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match failure {
            None => {
                task.status = TaskStatus::Completed;
                task.output = Some(assemble_output(task, duration_ms));
                info!(instance = %self.instance_id, task = %task.id, duration_ms, "Task completed");
            }
            Some(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err);
                info!(instance = %self.instance_id, task = %task.id, duration_ms, "Task failed");
            }
        }

        let mut instances = rt.instances.lock().await;
        if let Some(instance) = instances.get_mut(&self.instance_id) {
            if task.status == TaskStatus::Completed {
                instance.metrics.record_success(duration_ms);
            } else {
                instance.metrics.record_failure();
            }
            instance.current_task = None;
            if instance.status == AgentStatus::Running {
                instance.status = AgentStatus::Idle;
            }
        }
        Ok(())
    }

    async fn finish(&self, task: AgentTask) {
        let mut instances = self.runtime.instances.lock().await;
        if let Some(instance) = instances.get_mut(&self.instance_id) {
            instance.task_history.push(task);
        }
    }
}

/// Output assembled from each step's result plus one log line per step.
fn assemble_output(task: &AgentTask, duration_ms: u64) -> Value {
    let results: Vec<Value> = task
        .steps
        .iter()
        .map(|step| {
            json!({
                "action": step.action.name(),
                "status": step.status,
                "result": step.result,
            })
        })
        .collect();
    let log: Vec<String> = task
        .steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("step {} ({}): {:?}", i + 1, step.action.name(), step.status))
        .collect();
    json!({
        "results": results,
        "log": log,
        "durationMs": duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use workcell_core::{AgentCapability, AgentLimits, AgentType, StepError, TaskPriority};

    fn fast_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.retry.delay_ms = 1;
        config.workflow.poll_interval_ms = 5;
        config
    }

    async fn runtime_with(driver: Arc<SimulatedDriver>) -> AgentRuntime {
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(
            AgentDefinition::new("def-browse", "Scraper", AgentType::Research)
                .with_capability(AgentCapability::Browsing),
        )
        .await
        .unwrap();
        rt.register_agent(AgentDefinition::new(
            "def-plain",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        rt
    }

    async fn wait_for_terminal(rt: &AgentRuntime, instance_id: &str, task_id: &str) -> AgentTask {
        for _ in 0..500 {
            if let Some(task) = rt.get_task(instance_id, task_id).await {
                if task.status.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish in time", task_id);
    }

    fn generic_spec(instructions: &str) -> TaskSpec {
        TaskSpec::new("analyze")
            .with_params(json!({"instructions": instructions}))
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_definition() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let err = rt
            .register_agent(AgentDefinition::new("def-plain", "Again", AgentType::Analyst))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(rt.agent_definitions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_browsing_definition_attaches_session() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-browse", "user-1").await.unwrap();
        assert_eq!(instance.status, AgentStatus::Idle);
        let session_id = instance.session_id.expect("browsing instance needs a session");
        assert!(rt.sessions().get(&session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_spawn_plain_definition_has_no_session() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();
        assert!(instance.session_id.is_none());
        assert!(rt.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_spawn_unknown_definition_errors() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        assert!(rt.spawn_agent("ghost", "user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_list_agents_filters_by_user() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        rt.spawn_agent("def-plain", "alice").await.unwrap();
        rt.spawn_agent("def-plain", "alice").await.unwrap();
        rt.spawn_agent("def-plain", "bob").await.unwrap();

        assert_eq!(rt.list_agents(None).await.len(), 3);
        assert_eq!(rt.list_agents(Some("alice")).await.len(), 2);
        assert_eq!(rt.list_agents(Some("carol")).await.len(), 0);
    }

    #[tokio::test]
    async fn test_task_completes_and_metrics_accumulate() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        for i in 0..3 {
            let task = rt
                .execute_task(&instance.id, generic_spec(&format!("job {}", i)))
                .await
                .unwrap();
            let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
            assert_eq!(done.status, TaskStatus::Completed);
            assert!(done.output.is_some());
        }

        let agent = rt.get_agent(&instance.id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task.is_none());
        assert_eq!(agent.task_history.len(), 3);
        assert_eq!(agent.metrics.tasks_completed, 3);
        assert_eq!(
            agent.metrics.average_task_ms,
            agent.metrics.total_execution_ms as f64 / 3.0
        );
        assert_eq!(agent.metrics.error_rate, 0.0);
    }

    #[tokio::test]
    async fn test_output_has_one_log_line_per_step() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();
        let task = rt
            .execute_task(
                &instance.id,
                TaskSpec::new("api_request")
                    .with_params(json!({"url": "https://api.example.com/x"})),
            )
            .await
            .unwrap();
        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;

        let output = done.output.unwrap();
        assert_eq!(output["log"].as_array().unwrap().len(), done.steps.len());
        assert_eq!(output["results"].as_array().unwrap().len(), done.steps.len());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_counts_exactly() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.fail_always(StepError::driver("element never appears"));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(
            AgentDefinition::new("def-flaky", "Flaky", AgentType::Automation).with_limits(
                AgentLimits {
                    retry_attempts: Some(3),
                    retry_delay_ms: Some(1),
                    ..AgentLimits::default()
                },
            ),
        )
        .await
        .unwrap();

        let instance = rt.spawn_agent("def-flaky", "user-1").await.unwrap();
        let task = rt
            .execute_task(&instance.id, generic_spec("doomed"))
            .await
            .unwrap();
        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.retry_count, 3);
        let error = done.error.unwrap();
        assert_eq!(error.step, Some(0));
        assert_eq!(error.kind, StepErrorKind::Driver);

        let agent = rt.get_agent(&instance.id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.metrics.tasks_failed, 1);
        assert_eq!(agent.metrics.error_rate, 1.0);
    }

    #[tokio::test]
    async fn test_retry_resumes_same_step_index() {
        // First step succeeds; second step fails twice then succeeds.
        let driver = Arc::new(SimulatedDriver::new());
        let rt = AgentRuntime::with_driver(fast_config(), driver.clone());
        rt.register_agent(AgentDefinition::new(
            "def-plain",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        // api_request has exactly one step, so both scripted failures hit it.
        driver.script_failures(StepError::network("blip"), 2);
        let task = rt
            .execute_task(
                &instance.id,
                TaskSpec::new("api_request")
                    .with_params(json!({"url": "https://api.example.com/x"})),
            )
            .await
            .unwrap();
        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.retry_count, 2);
        assert_eq!(done.current_step, done.steps.len());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_skips_retries() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.fail_always(StepError::new(
            StepErrorKind::Driver,
            "fatal driver state",
            false,
        ));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(AgentDefinition::new(
            "def-plain",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        let task = rt
            .execute_task(&instance.id, generic_spec("fails fast"))
            .await
            .unwrap();
        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.retry_count, 0);
    }

    #[tokio::test]
    async fn test_running_instance_has_current_task() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(150)));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(AgentDefinition::new(
            "def-plain",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        let task = rt
            .execute_task(&instance.id, generic_spec("slow job"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mid = rt.get_agent(&instance.id).await.unwrap();
        assert_eq!(mid.status, AgentStatus::Running);
        assert_eq!(mid.current_task.as_ref().unwrap().id, task.id);

        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        let after = rt.get_agent(&instance.id).await.unwrap();
        assert_eq!(after.status, AgentStatus::Idle);
        assert!(after.current_task.is_none());
    }

    #[tokio::test]
    async fn test_polling_sees_live_step_progress() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(40)));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(
            AgentDefinition::new("def-browse", "Scraper", AgentType::Research)
                .with_capability(AgentCapability::Browsing),
        )
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-browse", "user-1").await.unwrap();

        // web_scrape: navigate (~40ms), wait (1000ms), extract, screenshot.
        let task = rt
            .execute_task(
                &instance.id,
                TaskSpec::new("web_scrape")
                    .with_params(json!({"url": "https://example.com", "selector": "h1"})),
            )
            .await
            .unwrap();

        // Observe during the wait step: navigate is already recorded.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mid = rt.get_task(&instance.id, &task.id).await.unwrap();
        assert_eq!(mid.status, TaskStatus::Running);
        assert!(mid.current_step >= 1, "observer should see completed steps");
        assert_eq!(mid.steps[0].status, StepStatus::Completed);

        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.current_step, done.steps.len());
    }

    #[tokio::test]
    async fn test_polling_sees_retry_count_climb() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(40)));
        driver.script_failures(StepError::network("blip"), 2);
        let rt = AgentRuntime::with_driver(
            {
                let mut config = fast_config();
                config.retry.delay_ms = 200;
                config
            },
            driver,
        );
        rt.register_agent(AgentDefinition::new(
            "def-plain",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        let task = rt
            .execute_task(&instance.id, generic_spec("flaky job"))
            .await
            .unwrap();

        // After the first failure (40ms) the runner sleeps 200ms before the
        // retry; the observer already sees the incremented counter.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let mid = rt.get_task(&instance.id, &task.id).await.unwrap();
        assert!(mid.retry_count >= 1, "observer should see retries as they happen");

        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.retry_count, 2);
    }

    #[tokio::test]
    async fn test_terminate_mid_task_cancels_remaining_steps() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(80)));
        let rt = AgentRuntime::with_driver(fast_config(), driver.clone());
        rt.register_agent(
            AgentDefinition::new("def-browse", "Scraper", AgentType::Research)
                .with_capability(AgentCapability::Browsing),
        )
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-browse", "user-1").await.unwrap();

        // Four steps; only the in-flight navigate may finish after terminate.
        let task = rt
            .execute_task(
                &instance.id,
                TaskSpec::new("web_scrape")
                    .with_params(json!({"url": "https://example.com", "selector": "h1"})),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        rt.terminate_agent(&instance.id).await.unwrap();

        // Without cancellation the extract step would hit the driver at
        // roughly navigate + wait = 1.1s; well past that, only the
        // in-flight navigate has run.
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(driver.calls(), 1, "only the in-flight step runs to completion");

        // Termination is final: instance, task and session are all gone.
        assert!(rt.get_agent(&instance.id).await.is_none());
        assert!(rt.get_task(&instance.id, &task.id).await.is_none());
        assert!(rt.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_terminate_releases_session_and_registry() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-browse", "user-1").await.unwrap();
        let session_id = instance.session_id.clone().unwrap();

        rt.terminate_agent(&instance.id).await.unwrap();
        assert!(rt.get_agent(&instance.id).await.is_none());
        assert!(rt.sessions().get(&session_id).await.is_none());
        assert!(rt.terminate_agent(&instance.id).await.is_err());
    }

    #[tokio::test]
    async fn test_paused_instance_rejects_tasks() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let instance = rt.spawn_agent("def-plain", "user-1").await.unwrap();

        rt.pause_agent(&instance.id).await.unwrap();
        assert!(rt
            .execute_task(&instance.id, generic_spec("nope"))
            .await
            .is_err());

        rt.resume_agent(&instance.id).await.unwrap();
        let task = rt
            .execute_task(&instance.id, generic_spec("ok now"))
            .await
            .unwrap();
        let done = wait_for_terminal(&rt, &instance.id, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_get_task_sees_queued_tasks() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(100)));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(
            AgentDefinition::new("def-serial", "Serial", AgentType::Automation).with_limits(
                AgentLimits {
                    max_concurrent_tasks: Some(1),
                    ..AgentLimits::default()
                },
            ),
        )
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-serial", "user-1").await.unwrap();

        let first = rt
            .execute_task(&instance.id, generic_spec("one"))
            .await
            .unwrap();
        let second = rt
            .execute_task(&instance.id, generic_spec("two"))
            .await
            .unwrap();

        // While the first runs, the second is observable as queued.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let queued = rt.get_task(&instance.id, &second.id).await.unwrap();
        assert_eq!(queued.status, TaskStatus::Queued);

        wait_for_terminal(&rt, &instance.id, &first.id).await;
        let done = wait_for_terminal(&rt, &instance.id, &second.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_critical_task_overtakes_queued_low() {
        let driver = Arc::new(SimulatedDriver::new().with_latency(Duration::from_millis(80)));
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(
            AgentDefinition::new("def-serial", "Serial", AgentType::Automation).with_limits(
                AgentLimits {
                    max_concurrent_tasks: Some(1),
                    ..AgentLimits::default()
                },
            ),
        )
        .await
        .unwrap();
        let instance = rt.spawn_agent("def-serial", "user-1").await.unwrap();

        // Occupy the single slot, then enqueue low before critical.
        let blocker = rt
            .execute_task(&instance.id, generic_spec("blocker"))
            .await
            .unwrap();
        let low = rt
            .execute_task(
                &instance.id,
                generic_spec("low").with_priority(TaskPriority::Low),
            )
            .await
            .unwrap();
        let critical = rt
            .execute_task(
                &instance.id,
                generic_spec("critical").with_priority(TaskPriority::Critical),
            )
            .await
            .unwrap();

        wait_for_terminal(&rt, &instance.id, &blocker.id).await;
        wait_for_terminal(&rt, &instance.id, &low.id).await;
        wait_for_terminal(&rt, &instance.id, &critical.id).await;

        let agent = rt.get_agent(&instance.id).await.unwrap();
        let order: Vec<&str> = agent
            .task_history
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        let low_pos = order.iter().position(|id| *id == low.id).unwrap();
        let critical_pos = order.iter().position(|id| *id == critical.id).unwrap();
        assert!(critical_pos < low_pos, "critical should run before low");
    }
}
