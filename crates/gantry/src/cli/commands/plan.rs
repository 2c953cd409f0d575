//! Plan command: show the lane layout without running anything

use clap::Args;
use console::style;

use gantry_tasks::{Deployer, LaneMatrix};

use super::{ad_hoc_steps, build_deployer, load_playbook};
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Show how queued tasks are laid out in lanes
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Ad-hoc command to plan instead of the playbook steps (repeatable)
    #[arg(short = 'c', long = "command")]
    pub commands: Vec<String>,

    /// Host group for ad-hoc commands
    #[arg(short, long)]
    pub group: Option<String>,
}

impl PlanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let (config, path) = load_playbook(cli)?;
        let steps = if self.commands.is_empty() {
            config.steps.clone()
        } else {
            ad_hoc_steps(&self.commands, self.group.as_deref(), None)
        };
        let deployer = build_deployer(&config, &steps)?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&plan_json(&deployer))?);
            return Ok(exit_codes::SUCCESS);
        }
        if cli.quiet {
            return Ok(exit_codes::SUCCESS);
        }

        if let Some(path) = &path {
            println!("{}", output::key_value("playbook", &path.display().to_string()));
        }
        let lanes = deployer.lanes();
        if !lanes.has_pending_work() {
            output::warning("Nothing to run: no steps queued");
            return Ok(exit_codes::SUCCESS);
        }

        let steps = lanes.lanes().iter().map(|l| l.len()).max().unwrap_or(0);
        output::info(&format!(
            "{} in {} across {}",
            output::plural(task_count(lanes), "task"),
            output::plural(steps, "step"),
            output::plural(lanes.lanes().iter().filter(|l| l.has_tasks()).count(), "lane"),
        ));
        println!();
        print!("{}", lanes.render());

        if cli.verbose {
            println!();
            println!("{}", output::header("Targets"));
            for (index, lane) in lanes.lanes().iter().enumerate() {
                for task in lane.slots().iter().flatten() {
                    println!(
                        "  {} {} {}",
                        style(format!("lane {}", index)).dim(),
                        task,
                        style(task.hosts().join(", ")).cyan()
                    );
                }
            }
        }

        Ok(exit_codes::SUCCESS)
    }
}

fn task_count(lanes: &LaneMatrix) -> usize {
    lanes.lanes().iter().map(|l| l.task_count()).sum()
}

fn plan_json(deployer: &Deployer) -> serde_json::Value {
    let lanes: Vec<serde_json::Value> = deployer
        .lanes()
        .lanes()
        .iter()
        .enumerate()
        .filter(|(_, lane)| lane.has_tasks())
        .map(|(index, lane)| {
            let slots: Vec<serde_json::Value> = lane
                .slots()
                .iter()
                .map(|slot| match slot {
                    Some(task) => serde_json::json!({
                        "task": task.to_string(),
                        "action": task.kind().action(),
                        "hosts": task.hosts(),
                        "timeout_ms": task.timeout_ms(),
                    }),
                    None => serde_json::Value::Null,
                })
                .collect();
            serde_json::json!({ "lane": index, "slots": slots })
        })
        .collect();

    serde_json::json!({
        "tasks": task_count(deployer.lanes()),
        "lanes": lanes,
    })
}
