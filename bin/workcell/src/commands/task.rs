use std::time::Duration;
use workcell_core::{TaskPriority, TaskSpec};

use super::{load_config, seeded_runtime};

pub async fn run(
    config_path: Option<&str>,
    definition: &str,
    kind: &str,
    params: &str,
    priority: &str,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let poll = Duration::from_millis(config.workflow.poll_interval_ms);
    let runtime = seeded_runtime(config).await?;

    let priority = match priority {
        "low" => TaskPriority::Low,
        "normal" => TaskPriority::Normal,
        "high" => TaskPriority::High,
        "critical" => TaskPriority::Critical,
        other => anyhow::bail!("unknown priority '{}'", other),
    };
    let params: serde_json::Value = serde_json::from_str(params)?;
    let spec = TaskSpec::new(kind)
        .with_priority(priority)
        .with_params(params);

    let instance = runtime.spawn_agent(definition, "cli").await?;
    let task = runtime.execute_task(&instance.id, spec).await?;
    println!("Submitted task {} ({} steps)", task.id, task.steps.len());

    let done = loop {
        match runtime.get_task(&instance.id, &task.id).await {
            Some(observed) if observed.status.is_terminal() => break observed,
            Some(_) => tokio::time::sleep(poll).await,
            None => anyhow::bail!("task {} disappeared", task.id),
        }
    };

    println!("Task {}: {}", done.id, done.status);
    if let Some(output) = &done.output {
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    if let Some(error) = &done.error {
        println!("Error: {}", serde_json::to_string_pretty(error)?);
    }

    runtime.terminate_agent(&instance.id).await?;
    Ok(())
}
