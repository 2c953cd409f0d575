//! Run report: per-host outcomes and timing

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gantry_core::error::ReportError;

use crate::task::Task;

/// Message recorded for hosts listed in a final reply's timed-out set
pub const TIMEOUT_MESSAGE: &str = "Command execution reached timeout.\n";

/// How a host (or the whole request) fared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Outcome {
    Success,
    Failure,
    ValidationError,
    Timeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::ValidationError => "validation_error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded outcome
#[derive(Debug, Clone)]
pub struct ReportEntry {
    /// Task that produced the entry
    pub task: Arc<Task>,
    /// Host, absent for validation errors
    pub host: Option<String>,
    pub outcome: Outcome,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Explanation from the worker or the driver
    pub message: Option<String>,
}

impl ReportEntry {
    /// Entry for a host reply
    pub fn from_reply(
        task: Arc<Task>,
        host: String,
        success: bool,
        stdout: Option<String>,
        stderr: Option<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            task,
            host: Some(host),
            outcome: if success {
                Outcome::Success
            } else {
                Outcome::Failure
            },
            stdout,
            stderr,
            message: message.filter(|m| !m.is_empty()),
        }
    }

    /// Entry for a rejected request
    pub fn validation_error(task: Arc<Task>, message: Option<String>) -> Self {
        Self {
            task,
            host: None,
            outcome: Outcome::ValidationError,
            stdout: None,
            stderr: None,
            message,
        }
    }

    /// Synthetic entry for a host that never replied in time
    pub fn timeout(task: Arc<Task>, host: String, message: impl Into<String>) -> Self {
        Self {
            task,
            host: Some(host),
            outcome: Outcome::Timeout,
            stdout: None,
            stderr: None,
            message: Some(message.into()),
        }
    }

    /// Synthetic failure raised by the driver rather than the worker
    pub fn failure(task: Arc<Task>, host: String, message: impl Into<String>) -> Self {
        Self {
            task,
            host: Some(host),
            outcome: Outcome::Failure,
            stdout: None,
            stderr: None,
            message: Some(message.into()),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.outcome.is_success()
    }

    /// Captured stdout
    pub fn output(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    /// Error text: stderr if non-empty, stdout if stderr was sent empty,
    /// otherwise the recorded message. Empty strings never count.
    pub fn error_output(&self) -> Option<&str> {
        fn non_empty(text: &Option<String>) -> Option<&str> {
            text.as_deref().filter(|t| !t.is_empty())
        }
        match self.stderr.as_deref() {
            Some(stderr) if !stderr.is_empty() => Some(stderr),
            Some(_) => non_empty(&self.stdout).or_else(|| non_empty(&self.message)),
            None => non_empty(&self.message),
        }
    }
}

impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{} | {}", self.task, host),
            None => write!(f, "{}", self.task),
        }
    }
}

/// Short report about a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    /// Elapsed time as `HH:MM:SS`
    pub execution: String,
}

/// Ordered outcomes of the last run
#[derive(Debug, Clone)]
pub struct Report {
    entries: Vec<ReportEntry>,
    started_at: DateTime<Utc>,
    elapsed: Duration,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    /// Empty report stamped with the current time
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Entries whose outcome is not Success
    pub fn failed(&self) -> Vec<&ReportEntry> {
        self.entries.iter().filter(|e| !e.is_successful()).collect()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn successful(&self) -> usize {
        self.entries.iter().filter(|e| e.is_successful()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.successful()
    }

    /// True iff every entry succeeded
    pub fn is_successful(&self) -> bool {
        self.entries.iter().all(ReportEntry::is_successful)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            total: self.total(),
            successful: self.successful(),
            failed: self.failed_count(),
            elapsed_ms: self.elapsed.as_millis(),
            execution: format_hms(self.elapsed),
        }
    }

    /// Stdout of the only entry
    pub fn single_output(&self) -> Result<Option<&str>, ReportError> {
        match self.entries.as_slice() {
            [] => Err(ReportError::NoEntries),
            [entry] => Ok(entry.output()),
            entries => Err(ReportError::MultipleEntries(entries.len())),
        }
    }
}

fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
