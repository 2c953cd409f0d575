//! Task types and construction

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gantry_core::error::TaskError;

use crate::registry::HostRegistry;

/// What a task does on its hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Run a shell command remotely
    Execute { command: String },
    /// Copy a local file to a remote path
    Transfer { source: String, target: String },
}

impl TaskKind {
    /// Wire action discriminator
    pub fn action(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "ssh",
            Self::Transfer { .. } => "scp",
        }
    }

    fn validate(&self) -> Result<(), TaskError> {
        let empty = |field: &str| TaskError::InvalidParameter {
            field: field.to_string(),
            message: "cannot be empty".to_string(),
        };
        match self {
            Self::Execute { command } if command.trim().is_empty() => Err(empty("command")),
            Self::Transfer { source, .. } if source.is_empty() => Err(empty("source")),
            Self::Transfer { target, .. } if target.is_empty() => Err(empty("target")),
            _ => Ok(()),
        }
    }
}

/// An immutable unit of work with its resolved hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    kind: TaskKind,
    hosts: Vec<String>,
    timeout_ms: u64,
}

impl Task {
    /// Resolve hosts and timeout for `kind`.
    ///
    /// Without a group the whole registry is targeted. A timeout of `None`
    /// or `0` falls back to `default_timeout_secs`.
    pub fn resolve(
        kind: TaskKind,
        registry: &HostRegistry,
        group: Option<&str>,
        timeout_secs: Option<u64>,
        default_timeout_secs: u64,
    ) -> Result<Self, TaskError> {
        kind.validate()?;

        let hosts = match group {
            Some(group) => {
                let hosts = registry.hosts_in_group(group);
                if hosts.is_empty() {
                    return Err(TaskError::InvalidGroup(group.to_string()));
                }
                hosts
            }
            None => {
                let hosts = registry.hosts();
                if hosts.is_empty() {
                    return Err(TaskError::NoHosts);
                }
                hosts
            }
        };

        let secs = match timeout_secs {
            Some(t) if t > 0 => t,
            _ => default_timeout_secs.max(1),
        };

        Ok(Self {
            kind,
            hosts,
            timeout_ms: secs.saturating_mul(1000),
        })
    }

    /// Build a remote command task
    pub fn execute(
        registry: &HostRegistry,
        command: impl Into<String>,
        group: Option<&str>,
        timeout_secs: Option<u64>,
        default_timeout_secs: u64,
    ) -> Result<Self, TaskError> {
        let kind = TaskKind::Execute {
            command: command.into(),
        };
        Self::resolve(kind, registry, group, timeout_secs, default_timeout_secs)
    }

    /// Build a file transfer task
    pub fn transfer(
        registry: &HostRegistry,
        source: impl Into<String>,
        target: impl Into<String>,
        group: Option<&str>,
        timeout_secs: Option<u64>,
        default_timeout_secs: u64,
    ) -> Result<Self, TaskError> {
        let kind = TaskKind::Transfer {
            source: source.into(),
            target: target.into(),
        };
        Self::resolve(kind, registry, group, timeout_secs, default_timeout_secs)
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Target hosts, resolution order
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Timeout in the wire unit (milliseconds)
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Command text for execute tasks
    pub fn command(&self) -> Option<&str> {
        match &self.kind {
            TaskKind::Execute { command } => Some(command),
            TaskKind::Transfer { .. } => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TaskKind::Execute { command } => write!(f, "CMD {}", command),
            TaskKind::Transfer { source, target } => write!(f, "CPY {} -> {}", source, target),
        }
    }
}
