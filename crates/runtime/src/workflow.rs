//! Sequential workflow engine on top of the instance manager.
//!
//! A workflow is a directed graph of steps; execution walks it one step at a
//! time, spawning a fresh instance for each step and terminating it when the
//! step's task reaches a terminal status. Cycles are legal and bounded by
//! the configured step cap.

use std::time::Duration;
use chrono::Utc;
use tracing::{info, warn};
use workcell_core::{
    Error, Result, TaskStatus, Workflow, WorkflowRun, WorkflowSpec, WorkflowStep,
    WorkflowStepResult,
};

use crate::manager::AgentRuntime;

impl AgentRuntime {
    /// Store a workflow definition. Steps are validated for shape only;
    /// branch targets are resolved at execution time.
    pub async fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow> {
        if spec.steps.is_empty() {
            return Err(Error::Workflow("workflow has no steps".to_string()));
        }
        let workflow = Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name,
            steps: spec.steps,
            created_at: Utc::now(),
        };
        info!(workflow = %workflow.id, name = %workflow.name, steps = workflow.steps.len(), "Created workflow");
        let mut workflows = self.workflows.lock().await;
        workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        let workflows = self.workflows.lock().await;
        workflows.get(workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let workflows = self.workflows.lock().await;
        let mut list: Vec<Workflow> = workflows.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Walk the workflow graph starting at its first step.
    ///
    /// Each visited step spawns an instance of the first registered
    /// definition matching the step's agent type, submits the step's task,
    /// polls it to a terminal status and terminates the instance again.
    /// Branching follows `on_success`/`on_failure`; a `None` branch ends the
    /// run. Hitting the step cap ends the run with `completed: false`.
    pub async fn execute_workflow(&self, workflow_id: &str, user_id: &str) -> Result<WorkflowRun> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("workflow '{}'", workflow_id)))?;

        let started_at = Utc::now();
        let mut results: Vec<WorkflowStepResult> = Vec::new();
        let mut completed = true;
        let mut current: Option<&WorkflowStep> = workflow.steps.first();

        info!(workflow = %workflow.id, user = %user_id, "Workflow started");
        while let Some(step) = current {
            if results.len() >= self.config.workflow.max_steps as usize {
                warn!(
                    workflow = %workflow.id,
                    cap = self.config.workflow.max_steps,
                    "Workflow step cap reached, stopping run"
                );
                completed = false;
                break;
            }

            let (result, success) = self.run_workflow_step(step, user_id).await;
            results.push(result);

            let next_id = if success {
                step.on_success.as_deref()
            } else {
                step.on_failure.as_deref()
            };
            current = match next_id {
                None => None,
                Some(id) => Some(workflow.steps.iter().find(|s| s.id == id).ok_or_else(
                    || {
                        Error::Workflow(format!(
                            "workflow '{}' step '{}' branches to unknown step '{}'",
                            workflow.id, step.id, id
                        ))
                    },
                )?),
            };
        }

        info!(
            workflow = %workflow.id,
            steps_run = results.len(),
            completed,
            "Workflow finished"
        );
        Ok(WorkflowRun {
            workflow_id: workflow.id,
            user_id: user_id.to_string(),
            steps: results,
            completed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Execute one workflow step end to end. Infrastructure problems become
    /// a failed step result rather than aborting the run; the graph's
    /// `on_failure` branch decides what happens next.
    async fn run_workflow_step(
        &self,
        step: &WorkflowStep,
        user_id: &str,
    ) -> (WorkflowStepResult, bool) {
        let failed = |instance_id: &str, task_id: &str| WorkflowStepResult {
            step_id: step.id.clone(),
            instance_id: instance_id.to_string(),
            task_id: task_id.to_string(),
            success: false,
        };

        let definition = match self.definition_by_type(step.agent_type).await {
            Some(definition) => definition,
            None => {
                warn!(step = %step.id, agent_type = ?step.agent_type, "No registered definition for step agent type");
                return (failed("", ""), false);
            }
        };

        let instance = match self.spawn_agent(&definition.id, user_id).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(step = %step.id, error = %e, "Failed to spawn instance for workflow step");
                return (failed("", ""), false);
            }
        };

        let task = match self.execute_task(&instance.id, step.task.clone()).await {
            Ok(task) => task,
            Err(e) => {
                warn!(step = %step.id, error = %e, "Failed to submit workflow step task");
                let _ = self.terminate_agent(&instance.id).await;
                return (failed(&instance.id, ""), false);
            }
        };

        let poll = Duration::from_millis(self.config.workflow.poll_interval_ms);
        let status = loop {
            match self.get_task(&instance.id, &task.id).await {
                Some(observed) if observed.status.is_terminal() => break Some(observed.status),
                Some(_) => tokio::time::sleep(poll).await,
                // The task vanished, e.g. the instance was terminated
                // externally mid-run.
                None => break None,
            }
        };

        let _ = self.terminate_agent(&instance.id).await;
        let success = status == Some(TaskStatus::Completed);
        info!(step = %step.id, instance = %instance.id, task = %task.id, success, "Workflow step finished");
        (
            WorkflowStepResult {
                step_id: step.id.clone(),
                instance_id: instance.id,
                task_id: task.id,
                success,
            },
            success,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use workcell_core::{
        AgentDefinition, AgentType, RuntimeConfig, StepError, StepErrorKind, TaskSpec,
    };
    use workcell_executor::SimulatedDriver;

    fn fast_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.retry.delay_ms = 1;
        config.workflow.poll_interval_ms = 5;
        config
    }

    async fn runtime_with(driver: Arc<SimulatedDriver>) -> AgentRuntime {
        let rt = AgentRuntime::with_driver(fast_config(), driver);
        rt.register_agent(AgentDefinition::new(
            "def-analyst",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();
        rt.register_agent(AgentDefinition::new(
            "def-automation",
            "Automation",
            AgentType::Automation,
        ))
        .await
        .unwrap();
        rt
    }

    fn step(id: &str, agent_type: AgentType, on_success: Option<&str>, on_failure: Option<&str>) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: format!("step {}", id),
            agent_type,
            task: TaskSpec::new("analyze").with_params(json!({"instructions": id})),
            on_success: on_success.map(str::to_string),
            on_failure: on_failure.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_empty_workflow() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let err = rt
            .create_workflow(WorkflowSpec {
                name: "empty".to_string(),
                steps: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
    }

    #[tokio::test]
    async fn test_create_and_list_workflows() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let created = rt
            .create_workflow(WorkflowSpec {
                name: "solo".to_string(),
                steps: vec![step("a", AgentType::Analyst, None, None)],
            })
            .await
            .unwrap();

        assert!(rt.get_workflow(&created.id).await.is_some());
        assert!(rt.get_workflow("ghost").await.is_none());
        assert_eq!(rt.list_workflows().await.len(), 1);
    }

    #[tokio::test]
    async fn test_two_step_workflow_runs_to_completion() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let workflow = rt
            .create_workflow(WorkflowSpec {
                name: "pipeline".to_string(),
                steps: vec![
                    step("gather", AgentType::Analyst, Some("act"), None),
                    step("act", AgentType::Automation, None, None),
                ],
            })
            .await
            .unwrap();

        let run = rt.execute_workflow(&workflow.id, "user-1").await.unwrap();

        assert!(run.completed);
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|r| r.success));
        assert_eq!(run.steps[0].step_id, "gather");
        assert_eq!(run.steps[1].step_id, "act");
        // Per-step instances are torn down again.
        assert!(rt.list_agents(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_takes_on_failure_branch() {
        let driver = Arc::new(SimulatedDriver::new());
        // First step fails terminally, the recovery step then succeeds.
        driver.script_failures(
            StepError::new(StepErrorKind::Driver, "broken", false),
            1,
        );
        let rt = runtime_with(driver).await;

        let workflow = rt
            .create_workflow(WorkflowSpec {
                name: "with recovery".to_string(),
                steps: vec![
                    step("risky", AgentType::Analyst, None, Some("recover")),
                    step("recover", AgentType::Automation, None, None),
                ],
            })
            .await
            .unwrap();

        let run = rt.execute_workflow(&workflow.id, "user-1").await.unwrap();
        assert!(run.completed);
        assert_eq!(run.steps.len(), 2);
        assert!(!run.steps[0].success);
        assert!(run.steps[1].success);
    }

    #[tokio::test]
    async fn test_unresolvable_agent_type_fails_step() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let workflow = rt
            .create_workflow(WorkflowSpec {
                name: "needs security".to_string(),
                // No Security definition is registered.
                steps: vec![step("audit", AgentType::Security, Some("audit"), None)],
            })
            .await
            .unwrap();

        let run = rt.execute_workflow(&workflow.id, "user-1").await.unwrap();
        assert!(run.completed);
        assert_eq!(run.steps.len(), 1);
        assert!(!run.steps[0].success);
        assert!(run.steps[0].instance_id.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_bounded_by_step_cap() {
        let mut config = fast_config();
        config.workflow.max_steps = 3;
        let rt = AgentRuntime::with_driver(config, Arc::new(SimulatedDriver::new()));
        rt.register_agent(AgentDefinition::new(
            "def-analyst",
            "Analyst",
            AgentType::Analyst,
        ))
        .await
        .unwrap();

        let workflow = rt
            .create_workflow(WorkflowSpec {
                name: "forever".to_string(),
                steps: vec![step("again", AgentType::Analyst, Some("again"), None)],
            })
            .await
            .unwrap();

        let run = rt.execute_workflow(&workflow.id, "user-1").await.unwrap();
        assert!(!run.completed);
        assert_eq!(run.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_dangling_branch_target_errors() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        let workflow = rt
            .create_workflow(WorkflowSpec {
                name: "broken graph".to_string(),
                steps: vec![step("a", AgentType::Analyst, Some("nowhere"), None)],
            })
            .await
            .unwrap();

        let err = rt.execute_workflow(&workflow.id, "user-1").await.unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
    }

    #[tokio::test]
    async fn test_unknown_workflow_errors() {
        let rt = runtime_with(Arc::new(SimulatedDriver::new())).await;
        assert!(rt.execute_workflow("ghost", "user-1").await.is_err());
    }
}
