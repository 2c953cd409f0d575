//! Run progress reporting

use std::sync::{Arc, Mutex, MutexGuard};

use crate::report::Outcome;

/// Events emitted while a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A task request was written to a lane's worker
    TaskStarted {
        lane: usize,
        step: usize,
        summary: String,
        /// Whether this is the first lane writing in this step
        first_in_step: bool,
    },
    /// An outcome was recorded
    HostOutcome {
        lane: usize,
        step: usize,
        host: Option<String>,
        outcome: Outcome,
    },
    /// Every lane finished the step
    StepFinished { step: usize },
}

impl Outcome {
    /// One-character progress symbol
    pub fn symbol(&self) -> char {
        match self {
            Self::Success => '.',
            Self::Failure => 'E',
            Self::ValidationError => 'J',
            Self::Timeout => 'T',
        }
    }
}

impl ProgressEvent {
    /// Plain-text fragment for line-oriented output
    pub fn fragment(&self) -> String {
        match self {
            Self::TaskStarted {
                summary,
                first_in_step,
                ..
            } => {
                if *first_in_step {
                    format!("{} ", summary)
                } else {
                    format!("\n{} ", summary)
                }
            }
            Self::HostOutcome { outcome, .. } => outcome.symbol().to_string(),
            Self::StepFinished { .. } => "\n".to_string(),
        }
    }
}

/// Receives progress events; never read back by the engine
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Logs events through tracing
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TaskStarted {
                lane,
                step,
                summary,
                ..
            } => {
                tracing::info!(lane, step, task = %summary, "task started");
            }
            ProgressEvent::HostOutcome {
                lane,
                step,
                host,
                outcome,
            } => {
                if outcome.is_success() {
                    tracing::debug!(lane, step, host = host.as_deref(), %outcome, "host finished");
                } else {
                    tracing::warn!(lane, step, host = host.as_deref(), %outcome, "host finished");
                }
            }
            ProgressEvent::StepFinished { step } => {
                tracing::debug!(step, "step finished");
            }
        }
    }
}

/// Hands text fragments to a closure
pub struct TextProgress<F> {
    write: F,
}

impl<F> TextProgress<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(write: F) -> Self {
        Self { write }
    }
}

impl<F> ProgressSink for TextProgress<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        (self.write)(&event.fragment());
    }
}

/// Collects events and their text for later inspection
#[derive(Debug, Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingProgress {
    fn lock(&self) -> MutexGuard<'_, Vec<ProgressEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All collected events
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.lock().clone()
    }

    /// Concatenated text fragments
    pub fn text(&self) -> String {
        self.lock().iter().map(ProgressEvent::fragment).collect()
    }
}

impl ProgressSink for CollectingProgress {
    fn report(&self, event: &ProgressEvent) {
        self.lock().push(event.clone());
    }
}

/// Broadcasts events to several sinks
#[derive(Default)]
pub struct ProgressRegistry {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressRegistry {
    /// Registry with a tracing sink
    pub fn new() -> Self {
        Self {
            sinks: vec![Arc::new(TracingProgress)],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register<S: ProgressSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Arc::new(sink));
    }

    pub fn register_shared(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn all(&self) -> &[Arc<dyn ProgressSink>] {
        &self.sinks
    }
}

impl ProgressSink for ProgressRegistry {
    fn report(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.report(event);
        }
    }
}
