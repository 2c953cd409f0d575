//! Host registry and group resolution

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use gantry_core::error::{ConfigError, Result};

/// A registered host with its group labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Host identifier, may include `:port`
    pub name: String,
    /// Group labels
    pub groups: BTreeSet<String>,
}

impl HostEntry {
    /// Whether the host carries `group`
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Hosts in registration order.
///
/// Re-adding a host replaces its groups and keeps its position.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    entries: Vec<HostEntry>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host with zero or more groups
    pub fn add<I, S>(&mut self, host: impl Into<String>, groups: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = host.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host".to_string(),
                message: "host name cannot be empty".to_string(),
            }
            .into());
        }

        let groups: BTreeSet<String> = groups.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.groups = groups,
            None => self.entries.push(HostEntry { name, groups }),
        }
        Ok(())
    }

    /// All host names, registration order
    pub fn hosts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Hosts carrying `group`, registration order
    pub fn hosts_in_group(&self, group: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.in_group(group))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Whether any host carries `group`
    pub fn has_group(&self, group: &str) -> bool {
        self.entries.iter().any(|e| e.in_group(group))
    }

    /// Every distinct group label, sorted
    pub fn groups(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|e| e.groups.iter().cloned())
            .collect()
    }

    /// Registered entries
    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
