mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "workcell")]
#[command(about = "An agent task-execution runtime", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file (defaults to ~/.workcell/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a canned two-step workflow against the simulated driver
    Demo,

    /// Spawn an agent and run a single task on it
    Task {
        /// Definition id to spawn (see `workcell definitions`)
        #[arg(short, long, default_value = "research")]
        definition: String,

        /// Task kind (web_scrape, form_fill, api_request, or free-form)
        kind: String,

        /// JSON task parameters
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Task priority (low, normal, high, critical)
        #[arg(long, default_value = "normal")]
        priority: String,
    },

    /// List the built-in agent definitions
    Definitions,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Demo => {
            commands::demo::run(cli.config.as_deref()).await?;
        }
        Commands::Task {
            definition,
            kind,
            params,
            priority,
        } => {
            commands::task::run(cli.config.as_deref(), &definition, &kind, &params, &priority)
                .await?;
        }
        Commands::Definitions => {
            commands::definitions::run().await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(cli.config.as_deref())?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(cli.config.as_deref(), force)?;
            }
        },
    }

    Ok(())
}
