use serde_json::json;
use workcell_core::{AgentType, TaskSpec, WorkflowSpec, WorkflowStep};

use super::{load_config, seeded_runtime};

/// Research-then-report workflow against whatever driver the config selects
/// (the simulated one by default).
pub async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let runtime = seeded_runtime(config).await?;

    let workflow = runtime
        .create_workflow(WorkflowSpec {
            name: "demo: scrape then summarize".to_string(),
            steps: vec![
                WorkflowStep {
                    id: "scrape".to_string(),
                    name: "Scrape the example page".to_string(),
                    agent_type: AgentType::Research,
                    task: TaskSpec::new("web_scrape").with_params(json!({
                        "url": "https://example.com",
                        "selector": "h1",
                    })),
                    on_success: Some("summarize".to_string()),
                    on_failure: None,
                },
                WorkflowStep {
                    id: "summarize".to_string(),
                    name: "Summarize what was found".to_string(),
                    agent_type: AgentType::Analyst,
                    task: TaskSpec::new("summarize").with_params(json!({
                        "instructions": "summarize the scraped page content",
                    })),
                    on_success: None,
                    on_failure: None,
                },
            ],
        })
        .await?;

    println!("Running workflow '{}' ({})", workflow.name, workflow.id);
    let run = runtime.execute_workflow(&workflow.id, "cli").await?;

    println!();
    for result in &run.steps {
        println!(
            "  {} {} (task {})",
            if result.success { "✓" } else { "✗" },
            result.step_id,
            result.task_id
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}
