//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{HostsCommand, PlanCommand, RunCommand};

/// Gantry - Run commands and uploads across host groups in parallel lanes
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<PathBuf>,

    /// Playbook file (default: searched upward from the working directory)
    #[arg(short = 'f', long, global = true, env = "GANTRY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the playbook (or ad-hoc commands) on the configured hosts
    Run(RunCommand),

    /// Show how queued tasks are laid out in lanes
    Plan(PlanCommand),

    /// List configured hosts and groups
    Hosts(HostsCommand),
}

impl Cli {
    /// Execute the CLI command and return the process exit code
    pub fn execute(&self) -> anyhow::Result<i32> {
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Run(cmd) => cmd.execute(self),
            Commands::Plan(cmd) => cmd.execute(self),
            Commands::Hosts(cmd) => cmd.execute(self),
        }
    }

    /// Whether human-readable output should be printed
    pub fn text_output(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}
