use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "anvil")]
#[command(version, about = "Spec-driven build orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Assume yes for confirmations (including resuming across spec drift)
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the spec file. If not provided, checks .anvil/spec.md then
    /// *spec*.md files in docs/plans/
    #[arg(long, global = true)]
    pub spec_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the plan and print the schedule without executing
    Plan,
    /// Execute the build from the beginning
    Run,
    /// Resume the build from the latest checkpoint
    Resume {
        /// Resume even if the spec changed since the checkpoint
        #[arg(long)]
        force: bool,
    },
    /// Show plan and checkpoint progress
    Status,
    /// Delete the plan and all checkpoints
    Reset {
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "anvil=debug" } else { "anvil=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Plan => cmd::cmd_plan(&cli, &project_dir).await?,
        Commands::Run => cmd::cmd_run(&cli, &project_dir, false, false).await?,
        Commands::Resume { force } => cmd::cmd_run(&cli, &project_dir, true, *force).await?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force || cli.yes)?,
    }

    Ok(())
}
