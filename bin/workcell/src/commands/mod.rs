pub mod config_cmd;
pub mod definitions;
pub mod demo;
pub mod task;

use std::path::Path;
use workcell_core::{AgentCapability, AgentDefinition, AgentType, RuntimeConfig};
use workcell_runtime::AgentRuntime;

/// Load the config from an explicit path or the default location.
pub fn load_config(path: Option<&str>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => Ok(RuntimeConfig::load(Path::new(path))?),
        None => Ok(RuntimeConfig::load_or_default()?),
    }
}

/// The definitions every CLI invocation starts from.
pub fn builtin_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("research", "Web researcher", AgentType::Research)
            .with_capability(AgentCapability::Browsing)
            .with_capability(AgentCapability::DataExtraction),
        AgentDefinition::new("automation", "Form automation", AgentType::Automation)
            .with_capability(AgentCapability::Browsing)
            .with_capability(AgentCapability::FormAutomation),
        AgentDefinition::new("analyst", "Data analyst", AgentType::Analyst)
            .with_capability(AgentCapability::ApiIntegration),
        AgentDefinition::new("builder", "Builder", AgentType::Builder)
            .with_capability(AgentCapability::FileManagement),
    ]
}

pub async fn seeded_runtime(config: RuntimeConfig) -> anyhow::Result<AgentRuntime> {
    let runtime = AgentRuntime::new(config)?;
    for definition in builtin_definitions() {
        runtime.register_agent(definition).await?;
    }
    Ok(runtime)
}
