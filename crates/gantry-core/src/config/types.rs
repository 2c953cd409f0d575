//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::defaults::{
    DEFAULT_REPLY_GRACE_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER, DEFAULT_WORKER_PROGRAM,
};

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playbook name, shown in CLI output
    pub name: Option<String>,

    /// Worker process configuration
    pub worker: WorkerConfig,

    /// Task defaults
    pub defaults: TaskDefaults,

    /// Registered hosts
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Steps to queue, in order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// How worker processes are launched.
///
/// Every lane of a run gets a worker started from the same settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker binary (GoSSHa compatible)
    pub program: String,

    /// Arguments placed before the identity flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides for the worker; an empty value removes the variable
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Remote login
    pub user: String,

    /// Private key passed to the worker
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Maximum simultaneous remote sessions per worker
    #[serde(default)]
    pub max_sessions: Option<u32>,

    /// Maximum simultaneous ssh-agent connections per worker
    #[serde(default)]
    pub max_agent_connections: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_WORKER_PROGRAM.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            user: DEFAULT_USER.to_string(),
            identity_file: None,
            max_sessions: None,
            max_agent_connections: None,
        }
    }
}

/// Defaults applied to queued tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    /// Timeout in seconds for tasks that do not set one
    pub timeout_secs: u64,

    /// Extra seconds to wait for a reply line beyond the task timeout
    pub reply_grace_secs: u64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            reply_grace_secs: DEFAULT_REPLY_GRACE_SECS,
        }
    }
}

/// A host and the groups it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Host name, optionally with `:port`
    pub name: String,

    /// Group labels
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A step of the playbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    /// Run a remote command
    Command {
        run: String,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },

    /// Copy a local file to remote hosts
    Upload {
        source: String,
        target: String,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },

    /// Start a new lane
    Lane,

    /// Run the nested steps in the same column
    Parallel {
        #[serde(default)]
        steps: Vec<StepConfig>,
    },
}

impl StepConfig {
    /// Short label for logs and validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Upload { .. } => "upload",
            Self::Lane => "lane",
            Self::Parallel { .. } => "parallel",
        }
    }
}
