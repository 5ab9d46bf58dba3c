use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// Fixed set of agent classes a definition can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Builder,
    Monitor,
    Support,
    Analyst,
    Automation,
    Security,
    Research,
    Testing,
    Deployment,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    /// Grants a browser session to every instance spawned from the definition.
    Browsing,
    DataExtraction,
    FormAutomation,
    ApiIntegration,
    FileManagement,
    Messaging,
}

/// Task priority. Derived `Ord` gives `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Initializing => "initializing",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl TaskStatus {
    /// A task in a terminal status will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-definition execution limits. Fields override the runtime defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentLimits {
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Immutable capability/config template for a class of workers.
/// Created once at registry seeding and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    #[serde(default)]
    pub limits: AgentLimits,
}

impl AgentDefinition {
    pub fn new(id: &str, name: &str, agent_type: AgentType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            agent_type,
            capabilities: Vec::new(),
            limits: AgentLimits::default(),
        }
    }

    pub fn with_capability(mut self, capability: AgentCapability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn can_browse(&self) -> bool {
        self.capabilities.contains(&AgentCapability::Browsing)
    }
}

/// Cumulative (not windowed) execution metrics for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_execution_ms: u64,
    pub average_task_ms: f64,
    pub error_rate: f64,
}

impl AgentMetrics {
    pub fn record_success(&mut self, duration_ms: u64) {
        self.tasks_completed += 1;
        self.total_execution_ms += duration_ms;
        self.average_task_ms = self.total_execution_ms as f64 / self.tasks_completed as f64;
        self.recompute_error_rate();
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
        self.recompute_error_rate();
    }

    fn recompute_error_rate(&mut self) {
        let total = self.tasks_completed + self.tasks_failed;
        self.error_rate = if total == 0 {
            0.0
        } else {
            self.tasks_failed as f64 / total as f64
        };
    }
}

/// A live worker spawned from a definition. Mutated only by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstance {
    pub id: String,
    pub definition_id: String,
    pub user_id: String,
    pub status: AgentStatus,
    /// Present exactly while the instance status is `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<AgentTask>,
    /// Append-only record of finished tasks.
    #[serde(default)]
    pub task_history: Vec<AgentTask>,
    #[serde(default)]
    pub metrics: AgentMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub spawned_at: DateTime<Utc>,
}

impl AgentInstance {
    pub fn new(definition_id: &str, user_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            definition_id: definition_id.to_string(),
            user_id: user_id.to_string(),
            status: AgentStatus::Initializing,
            current_task: None,
            task_history: Vec::new(),
            metrics: AgentMetrics::default(),
            session_id: None,
            spawned_at: Utc::now(),
        }
    }
}

/// One atomic operation against a session. The action tag doubles as the
/// wire name (`{"action": "navigate", "url": ...}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Select {
        selector: String,
        value: String,
    },
    Wait {
        duration_ms: u64,
    },
    Screenshot {
        #[serde(default)]
        full_page: bool,
    },
    Extract {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        attribute: Option<String>,
    },
    Evaluate {
        script: String,
    },
    /// Remote call: a plain network request whose JSON body becomes the data.
    HttpRequest {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    FileOp {
        operation: String,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Escape hatch for actions this executor does not know. Always degrades
    /// to a soft `unsupported_action` failure at execution time.
    Custom {
        name: String,
        #[serde(default)]
        params: Value,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

impl StepAction {
    /// Short name used in logs and log lines of assembled task output.
    pub fn name(&self) -> &str {
        match self {
            StepAction::Navigate { .. } => "navigate",
            StepAction::Click { .. } => "click",
            StepAction::Type { .. } => "type",
            StepAction::Select { .. } => "select",
            StepAction::Wait { .. } => "wait",
            StepAction::Screenshot { .. } => "screenshot",
            StepAction::Extract { .. } => "extract",
            StepAction::Evaluate { .. } => "evaluate",
            StepAction::HttpRequest { .. } => "http_request",
            StepAction::FileOp { .. } => "file_op",
            StepAction::Custom { .. } => "custom",
        }
    }
}

/// The success side of a step execution.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Base64 image payload when the step captured one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl StepOutcome {
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn with_log(log: impl Into<String>) -> Self {
        Self {
            log: Some(log.into()),
            ..Self::default()
        }
    }
}

/// One step of a task, with its own status independent of the parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStep {
    pub id: String,
    pub action: StepAction,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StepOutcome>,
}

impl TaskStep {
    pub fn new(action: StepAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            status: StepStatus::Pending,
            result: None,
        }
    }
}

/// A unit of work submitted to an instance's queue.
///
/// Invariant: `current_step` is a valid index into `steps` while the task is
/// running; it equals `steps.len()` once every step completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub id: String,
    pub agent_id: String,
    pub kind: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub steps: Vec<TaskStep>,
    pub current_step: usize,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AgentTask {
    pub fn new(agent_id: &str, kind: &str, priority: TaskPriority, steps: Vec<TaskStep>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            kind: kind.to_string(),
            priority,
            status: TaskStatus::Pending,
            steps,
            current_step: 0,
            retry_count: 0,
            error: None,
            output: None,
            created_at: Utc::now(),
        }
    }
}

/// Submission surface of `execute_task`: the task kind selects a step
/// template, `params` feeds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub kind: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub params: Value,
}

impl TaskSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            priority: TaskPriority::default(),
            params: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
    Handoff,
}

/// Point-to-point message between agent instances. Immutable after creation
/// except for the `acknowledged` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: String,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub kind: MessageKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl AgentMessage {
    pub fn new(from: &str, to: &str, kind: MessageKind, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from_agent_id: from.to_string(),
            to_agent_id: to.to_string(),
            kind,
            payload,
            created_at: Utc::now(),
            acknowledged: false,
        }
    }
}

/// One node of a workflow graph: which agent type to spawn, which task to
/// run, and where to branch on success/failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub task: TaskSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

/// A named directed graph of steps. Execution starts at `steps[0]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

/// Submission shape for `create_workflow`; the runtime assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// Outcome of one executed workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepResult {
    pub step_id: String,
    pub instance_id: String,
    pub task_id: String,
    pub success: bool,
}

/// Report returned by `execute_workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub user_id: String,
    pub steps: Vec<WorkflowStepResult>,
    /// False when the run stopped because the step cap was hit.
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
