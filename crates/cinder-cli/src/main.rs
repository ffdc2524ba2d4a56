//! Cinder CLI entrypoint.

use clap::Parser;
use cinder_scheduler::SchedulerConfig;
use std::path::PathBuf;

mod commands;
mod handlers;
mod logging;

use commands::{Commands, ConfigCommands};

#[derive(Parser)]
#[command(name = "cinder")]
#[command(author, version, about = "Cinder resource-group scheduler", long_about = None)]
struct Cli {
    /// Scheduler configuration file (YAML)
    #[arg(short, long, global = true, env = "CINDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SchedulerConfig::load(cli.config.as_deref())?;
    logging::init(config.log_format);

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Sweep => handlers::sweep(&config).await?,
        Commands::Worker { owner } => handlers::worker(&config, owner).await?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
        },
    }

    Ok(())
}
