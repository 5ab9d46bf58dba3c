use super::builtin_definitions;

pub async fn run() -> anyhow::Result<()> {
    println!("Built-in agent definitions");
    println!("==========================");
    println!();
    for definition in builtin_definitions() {
        let capabilities: Vec<String> = definition
            .capabilities
            .iter()
            .map(|c| format!("{:?}", c))
            .collect();
        println!(
            "  {:<12} {:<18} type={:?} capabilities=[{}]",
            definition.id,
            definition.name,
            definition.agent_type,
            capabilities.join(", ")
        );
    }
    Ok(())
}
