//! Worker wire protocol
//!
//! One JSON object per line in both directions. Requests carry an `Action`
//! discriminator, replies a `Type` discriminator. A task's reply stream ends
//! with either a `UserError` or a `FinalReply` line.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::task::{Task, TaskKind};

/// A request line sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Action")]
pub enum Request {
    /// Execute a command on every host
    #[serde(rename = "ssh", rename_all = "PascalCase")]
    Ssh {
        cmd: String,
        hosts: Vec<String>,
        timeout: u64,
    },
    /// Copy `source` to `target` on every host
    #[serde(rename = "scp", rename_all = "PascalCase")]
    Scp {
        source: String,
        target: String,
        hosts: Vec<String>,
        timeout: u64,
    },
}

impl Request {
    pub fn hosts(&self) -> &[String] {
        match self {
            Self::Ssh { hosts, .. } | Self::Scp { hosts, .. } => hosts,
        }
    }
}

impl From<&Task> for Request {
    fn from(task: &Task) -> Self {
        let hosts = task.hosts().to_vec();
        let timeout = task.timeout_ms();
        match task.kind() {
            TaskKind::Execute { command } => Self::Ssh {
                cmd: command.clone(),
                hosts,
                timeout,
            },
            TaskKind::Transfer { source, target } => Self::Scp {
                source: source.clone(),
                target: target.clone(),
                hosts,
                timeout,
            },
        }
    }
}

/// A reply line read from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum Reply {
    /// Outcome for one host
    #[serde(rename = "Reply", rename_all = "PascalCase")]
    Host {
        hostname: String,
        success: bool,
        #[serde(default)]
        stdout: Option<String>,
        #[serde(default)]
        stderr: Option<String>,
        #[serde(default, rename = "ErrMsg")]
        error_message: Option<String>,
    },

    /// The request itself was rejected; terminal
    #[serde(rename = "UserError", rename_all = "PascalCase")]
    UserError {
        #[serde(default, rename = "ErrorMsg")]
        error_message: Option<String>,
        #[serde(default)]
        is_critical: bool,
    },

    /// End of a task's replies; terminal
    #[serde(rename = "FinalReply", rename_all = "PascalCase")]
    Final {
        #[serde(default, deserialize_with = "null_as_empty")]
        timed_out_hosts: BTreeMap<String, serde_json::Value>,
        #[serde(default)]
        total_time: Option<f64>,
    },

    /// Any other message type (progress notices and the like)
    #[serde(other)]
    Unknown,
}

impl Reply {
    /// Whether this line ends the current task's reply stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::UserError { .. } | Self::Final { .. })
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Serialize a request as one newline-terminated line
pub fn encode_request(request: &Request) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Parse one reply line
pub fn decode_reply(line: &str) -> Result<Reply, serde_json::Error> {
    serde_json::from_str(line.trim())
}
