//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, StepConfig};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_worker(config)?;
    validate_defaults(config)?;
    validate_hosts(config)?;
    validate_steps(&config.steps, false)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> crate::error::GantryError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
    .into()
}

fn validate_worker(config: &Config) -> Result<()> {
    if config.worker.program.trim().is_empty() {
        return Err(invalid("worker.program", "program cannot be empty"));
    }

    if config.worker.user.trim().is_empty() {
        return Err(invalid("worker.user", "user cannot be empty"));
    }

    if config.worker.max_sessions == Some(0) {
        return Err(invalid("worker.max_sessions", "must be greater than 0"));
    }

    if config.worker.max_agent_connections == Some(0) {
        return Err(invalid(
            "worker.max_agent_connections",
            "must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_defaults(config: &Config) -> Result<()> {
    if config.defaults.timeout_secs == 0 {
        return Err(invalid("defaults.timeout_secs", "must be greater than 0"));
    }

    if config.defaults.reply_grace_secs == 0 {
        return Err(invalid("defaults.reply_grace_secs", "must be greater than 0"));
    }

    Ok(())
}

fn validate_hosts(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for host in &config.hosts {
        if host.name.trim().is_empty() {
            return Err(invalid("hosts.name", "host name cannot be empty"));
        }
        if !seen.insert(host.name.as_str()) {
            return Err(invalid(
                "hosts.name",
                format!("duplicate host '{}'", host.name),
            ));
        }
    }
    Ok(())
}

fn validate_steps(steps: &[StepConfig], nested: bool) -> Result<()> {
    for step in steps {
        match step {
            StepConfig::Command { run, .. } if run.trim().is_empty() => {
                return Err(invalid("steps.run", "command cannot be empty"));
            }
            StepConfig::Upload { source, target, .. }
                if source.is_empty() || target.is_empty() =>
            {
                return Err(invalid("steps.upload", "source and target are required"));
            }
            StepConfig::Lane if nested => {
                return Err(invalid(
                    "steps.parallel",
                    "a lane step cannot appear inside a parallel block",
                ));
            }
            StepConfig::Parallel { .. } if nested => {
                return Err(invalid(
                    "steps.parallel",
                    "parallel blocks cannot be nested",
                ));
            }
            StepConfig::Parallel { steps } => validate_steps(steps, true)?,
            _ => {}
        }
    }
    Ok(())
}
