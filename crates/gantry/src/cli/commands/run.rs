//! Run command: execute the playbook across the configured hosts

use std::path::PathBuf;

use clap::Args;
use console::{style, Term};
use tracing::{debug, info};

use gantry_tasks::{Outcome, ProgressEvent, ProgressSink, Report, ReportEntry, TracingProgress};

use super::{ad_hoc_steps, build_deployer, load_playbook};
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Run the playbook (or ad-hoc commands) on the configured hosts
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Ad-hoc command to run instead of the playbook steps (repeatable)
    #[arg(short = 'c', long = "command")]
    pub commands: Vec<String>,

    /// Host group for ad-hoc commands (default: every host)
    #[arg(short, long)]
    pub group: Option<String>,

    /// Timeout in seconds for ad-hoc commands
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Default timeout in seconds for tasks without one
    #[arg(long)]
    pub default_timeout: Option<u64>,

    /// Worker binary
    #[arg(long)]
    pub worker: Option<String>,

    /// Remote login
    #[arg(short, long)]
    pub user: Option<String>,

    /// Private key passed to the worker
    #[arg(short, long)]
    pub identity_file: Option<PathBuf>,

    /// Print the output of every host
    #[arg(long)]
    pub show_output: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let (mut config, path) = load_playbook(cli)?;
        if let Some(program) = &self.worker {
            config.worker.program = program.clone();
        }
        if let Some(user) = &self.user {
            config.worker.user = user.clone();
        }
        if let Some(identity) = &self.identity_file {
            config.worker.identity_file = Some(identity.clone());
        }

        let steps = if self.commands.is_empty() {
            config.steps.clone()
        } else {
            ad_hoc_steps(&self.commands, self.group.as_deref(), self.timeout)
        };

        let mut deployer = build_deployer(&config, &[])?;
        if let Some(secs) = self.default_timeout {
            deployer.set_default_timeout(secs)?;
        }
        for step in &steps {
            deployer.queue(step)?;
        }

        if !deployer.has_tasks() {
            if cli.text_output() {
                output::warning("Nothing to run: no steps queued");
            }
            return Ok(exit_codes::SUCCESS);
        }

        info!(
            playbook = ?path,
            hosts = deployer.hosts().len(),
            "starting run"
        );

        let progress: Box<dyn ProgressSink> = if cli.text_output() {
            Box::new(ConsoleProgress::new())
        } else {
            Box::new(TracingProgress)
        };

        let report = deployer.run(progress.as_ref()).await?;

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report_json(report))?);
            }
            OutputFormat::Text if !cli.quiet => {
                print_report(report, cli.verbose || self.show_output);
            }
            OutputFormat::Text => {}
        }

        if report.is_successful() {
            Ok(exit_codes::SUCCESS)
        } else {
            Ok(exit_codes::TASK_FAILED)
        }
    }
}

/// Prints the progress line of each step as it happens
struct ConsoleProgress {
    term: Term,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    fn write(&self, text: &str) {
        written(self.term.write_str(text));
    }
}

/// Whether a progress write succeeded; failures are only logged
fn written(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "failed to write progress to terminal");
            false
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TaskStarted {
                summary,
                first_in_step,
                ..
            } => {
                let prefix = if *first_in_step { "" } else { "\n" };
                self.write(&format!("{}{} ", prefix, style(summary).bold()));
            }
            ProgressEvent::HostOutcome { outcome, .. } => {
                let symbol = outcome.symbol().to_string();
                self.write(&output::outcome_style(*outcome).apply_to(symbol).to_string());
            }
            ProgressEvent::StepFinished { .. } => self.write("\n"),
        }
    }
}

fn print_report(report: &Report, show_output: bool) {
    let summary = report.summary();

    if show_output {
        println!();
        for entry in report.entries() {
            print_entry(entry);
        }
    }

    let failed = report.failed();
    if !failed.is_empty() {
        println!();
        println!(
            "  {} {}/{} failed:",
            style("✗").red().bold(),
            failed.len(),
            output::plural(summary.total, "result")
        );
        for entry in &failed {
            println!(
                "    {} {} [{}]: {}",
                output::outcome_style(entry.outcome).apply_to(entry.outcome.symbol()),
                entry,
                entry.outcome,
                entry.error_output().unwrap_or("").trim_end()
            );
        }
    }

    println!();
    let line = format!(
        "{}, {} succeeded, {} failed in {}",
        output::plural(summary.total, "result"),
        summary.successful,
        summary.failed,
        summary.execution
    );
    if failed.is_empty() {
        output::success(&line);
    } else {
        output::error(&line);
    }
}

fn print_entry(entry: &ReportEntry) {
    let host = entry.host.as_deref().unwrap_or("-");
    println!("{}", output::header(&entry.task.to_string()));
    println!("{}", output::key_value("host", &output::host_style().apply_to(host).to_string()));
    println!("{}", output::key_value("outcome", entry.outcome.as_str()));
    if let Some(stdout) = entry.output().filter(|s| !s.is_empty()) {
        for line in stdout.lines() {
            println!("    {}", line);
        }
    }
    if entry.outcome != Outcome::Success {
        if let Some(error) = entry.error_output() {
            for line in error.lines() {
                println!("    {}", style(line).red());
            }
        }
    }
}

fn report_json(report: &Report) -> serde_json::Value {
    serde_json::json!({
        "started_at": report.started_at().to_rfc3339(),
        "summary": report.summary(),
        "successful": report.is_successful(),
        "entries": report.entries().iter().map(|entry| {
            serde_json::json!({
                "task": entry.task.to_string(),
                "action": entry.task.kind().action(),
                "host": entry.host,
                "outcome": entry.outcome.as_str(),
                "stdout": entry.stdout,
                "stderr": entry.stderr,
                "message": entry.message,
            })
        }).collect::<Vec<_>>(),
    })
}
