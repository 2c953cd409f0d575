//! Hosts command: list the host inventory

use clap::Args;

use gantry_tasks::{HostEntry, HostRegistry};

use super::{build_deployer, load_playbook};
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// List configured hosts and groups
#[derive(Debug, Args)]
pub struct HostsCommand {
    /// Only list hosts in this group
    #[arg(short, long)]
    pub group: Option<String>,
}

impl HostsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let (config, _) = load_playbook(cli)?;
        let deployer = build_deployer(&config, &[])?;
        let registry = deployer.registry();

        if let Some(group) = &self.group {
            if !registry.has_group(group) {
                anyhow::bail!("Unknown group \"{}\"", group);
            }
        }
        let entries = select(registry, self.group.as_deref());

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(exit_codes::SUCCESS);
        }
        if cli.quiet {
            return Ok(exit_codes::SUCCESS);
        }

        if entries.is_empty() {
            output::warning("No hosts configured");
            return Ok(exit_codes::SUCCESS);
        }

        println!("{}", output::header("Hosts"));
        for entry in &entries {
            let groups: Vec<String> = entry
                .groups
                .iter()
                .map(|g| output::group_style().apply_to(g).to_string())
                .collect();
            println!(
                "  {} {}",
                output::host_style().apply_to(&entry.name),
                groups.join(" ")
            );
        }

        if cli.verbose {
            println!();
            println!("{}", output::header("Groups"));
            for group in registry.groups() {
                println!(
                    "{}",
                    output::key_value(&group, &registry.hosts_in_group(&group).join(", "))
                );
            }
        }

        Ok(exit_codes::SUCCESS)
    }
}

fn select<'a>(registry: &'a HostRegistry, group: Option<&str>) -> Vec<&'a HostEntry> {
    registry
        .entries()
        .iter()
        .filter(|entry| group.map_or(true, |g| entry.in_group(g)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_group() {
        let mut registry = HostRegistry::new();
        registry.add("web1", ["web", "all"]).unwrap();
        registry.add("db1", ["db", "all"]).unwrap();

        let names = |entries: Vec<&HostEntry>| -> Vec<String> {
            entries.iter().map(|e| e.name.clone()).collect()
        };
        assert_eq!(names(select(&registry, None)), vec!["web1", "db1"]);
        assert_eq!(names(select(&registry, Some("db"))), vec!["db1"]);
        assert_eq!(names(select(&registry, Some("all"))).len(), 2);
    }
}
