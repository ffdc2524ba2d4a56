//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a CI configuration file
    Validate {
        /// Path to the CI file
        #[arg(default_value = ".cinder-ci.yml")]
        path: PathBuf,
    },

    /// Run a single scheduler sweep and print its report
    Sweep,

    /// Run the scheduler worker until interrupted
    Worker {
        /// Lease owner name, defaults to a generated one
        #[arg(long)]
        owner: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}
