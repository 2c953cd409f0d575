//! CLI commands

mod hosts;
mod plan;
mod run;

pub use hosts::HostsCommand;
pub use plan::PlanCommand;
pub use run::RunCommand;

use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use gantry_core::config::{load_config, load_config_from_dir};
use gantry_core::{Config, ConfigError, GantryError, StepConfig};
use gantry_tasks::Deployer;

use crate::cli::Cli;

/// Load the playbook named on the command line, or the nearest one
fn load_playbook(cli: &Cli) -> anyhow::Result<(Config, Option<PathBuf>)> {
    if let Some(path) = &cli.config {
        let config = load_config(path)
            .with_context(|| format!("Failed to load playbook {}", path.display()))?;
        return Ok((config, Some(path.clone())));
    }

    let cwd = std::env::current_dir()?;
    match load_config_from_dir(&cwd) {
        Ok((config, path)) => Ok((config, Some(path))),
        Err(GantryError::Config(ConfigError::NotFound(_))) => {
            debug!(dir = %cwd.display(), "no playbook found, using defaults");
            Ok((Config::default(), None))
        }
        Err(e) => Err(e).context("Failed to load playbook"),
    }
}

/// Ad-hoc commands replacing the playbook steps
fn ad_hoc_steps(commands: &[String], group: Option<&str>, timeout: Option<u64>) -> Vec<StepConfig> {
    commands
        .iter()
        .map(|run| StepConfig::Command {
            run: run.clone(),
            group: group.map(str::to_string),
            timeout,
        })
        .collect()
}

/// Deployer with the playbook's hosts and the given steps queued
fn build_deployer(config: &Config, steps: &[StepConfig]) -> anyhow::Result<Deployer> {
    let mut deployer = Deployer::from_config(config)?;
    for step in steps {
        deployer
            .queue(step)
            .with_context(|| format!("Failed to queue {} step", step.kind()))?;
    }
    Ok(deployer)
}
