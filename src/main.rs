use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roundtable::state::{ExecutionMode, Feature};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "roundtable")]
#[command(version, about = "Round-based orchestrator for LLM coding agents")]
pub struct Cli {
    /// Workspace the agents work on (defaults to the current directory)
    #[arg(short, long, global = true, env = "ROUNDTABLE_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write JSON logs to <dir>/roundtable.log
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run rounds of agents against the workspace until the goal passes
    Run {
        /// What the agents should achieve
        goal: String,

        /// Execution mode: local or demo (overrides roundtable.toml)
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Maximum number of rounds (overrides roundtable.toml)
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Enable features on top of the configured ones (comma-separated)
        #[arg(short, long = "features", value_delimiter = ',')]
        features: Vec<Feature>,

        /// Ignore the features listed in roundtable.toml
        #[arg(long)]
        no_config_features: bool,
    },
    /// Restore the workspace to a round's checkpoint
    Rewind {
        #[arg(short, long)]
        round: u32,
    },
    /// List saved checkpoints
    Checkpoints,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default roundtable.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = roundtable::telemetry::parse_level(&cli.log_level)?;
    let _log_guard = roundtable::telemetry::init_tracing(cli.json_logs, level, cli.log_dir.as_deref())?;

    let workspace = match cli.workspace.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            goal,
            mode,
            max_rounds,
            features,
            no_config_features,
        } => {
            cmd::cmd_run(
                &workspace,
                cmd::RunArgs {
                    goal: goal.clone(),
                    mode: *mode,
                    max_rounds: *max_rounds,
                    features: features.clone(),
                    no_config_features: *no_config_features,
                },
            )
            .await?
        }
        Commands::Rewind { round } => cmd::cmd_rewind(&workspace, *round)?,
        Commands::Checkpoints => cmd::cmd_checkpoints(&workspace)?,
        Commands::Config { command } => cmd::cmd_config(&workspace, command.clone())?,
    }

    Ok(())
}
