//! Step-synchronised execution of an execution plan
//!
//! Every lane gets its own worker. For each step the driver first writes the
//! step's request to every lane that has a task there, then drains the lanes
//! in order until each one produced its terminal reply. Only then does the
//! next step start.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use gantry_core::config::DEFAULT_REPLY_GRACE_SECS;
use gantry_core::error::WorkerError;
use gantry_core::TaskDefaults;

use crate::lanes::ExecutionPlan;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::protocol::{Reply, Request};
use crate::report::{Outcome, Report, ReportEntry, TIMEOUT_MESSAGE};
use crate::task::Task;
use crate::worker::{ReadError, WorkerHandle, WorkerLauncher};

/// Message for hosts left without a reply when a worker closed its output
pub const WORKER_EXITED_MESSAGE: &str = "Worker process exited before the final reply.\n";

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    /// Starting workers
    Preparing,
    /// Writing the requests of a step
    Running(usize),
    /// Waiting for the replies of a step
    Draining(usize),
}

impl RunState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?state, to = ?next, "run state");
    *state = next;
}

fn stalled_message(wait: Duration) -> String {
    format!("Worker did not reply within {}s.\n", wait.as_secs())
}

fn unavailable_message(lane: usize) -> String {
    format!("Worker for lane {} is no longer available.\n", lane)
}

struct LaneWorker {
    lane: usize,
    handle: Option<WorkerHandle>,
}

impl LaneWorker {
    /// Kill the worker; later tasks on this lane are not sent
    async fn retire(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(lane = self.lane, "retiring lane");
            handle.kill().await;
        }
    }

    async fn shutdown(self) {
        if let Some(handle) = self.handle {
            handle.shutdown().await;
        }
    }
}

enum Dispatch {
    Sent,
    Unavailable,
}

/// Runs plans against workers from a launcher
pub struct Driver<'a> {
    launcher: &'a dyn WorkerLauncher,
    progress: &'a dyn ProgressSink,
    reply_grace: Duration,
}

impl<'a> Driver<'a> {
    pub fn new(launcher: &'a dyn WorkerLauncher, progress: &'a dyn ProgressSink) -> Self {
        Self {
            launcher,
            progress,
            reply_grace: Duration::from_secs(DEFAULT_REPLY_GRACE_SECS),
        }
    }

    /// Extra wait on top of a task's timeout before a silent worker is
    /// considered stalled
    pub fn with_reply_grace(mut self, grace: Duration) -> Self {
        self.reply_grace = grace;
        self
    }

    pub fn with_defaults(self, defaults: &TaskDefaults) -> Self {
        self.with_reply_grace(Duration::from_secs(defaults.reply_grace_secs))
    }

    /// Execute every step of `plan`.
    ///
    /// Fails only if a worker cannot be started; every other problem is
    /// recorded in the returned report.
    #[instrument(skip_all, fields(lanes = plan.lanes().len(), steps = plan.steps()))]
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        state: &mut RunState,
    ) -> Result<Report, WorkerError> {
        let mut report = Report::new();
        if plan.is_empty() {
            debug!("nothing to run");
            return Ok(report);
        }

        transition(state, RunState::Preparing);
        let mut workers = match self.spawn_workers(&plan).await {
            Ok(workers) => workers,
            Err(e) => {
                transition(state, RunState::Idle);
                return Err(e);
            }
        };
        info!(tasks = plan.task_count(), "run started");

        let started = Instant::now();
        for step in 0..plan.steps() {
            transition(state, RunState::Running(step));
            let dispatched = self.dispatch_step(step, &plan, &mut workers).await;

            transition(state, RunState::Draining(step));
            for (position, task, dispatch) in dispatched {
                let worker = &mut workers[position];
                match dispatch {
                    Dispatch::Sent => self.drain(step, worker, &task, &mut report).await,
                    Dispatch::Unavailable => {
                        let message = unavailable_message(worker.lane);
                        for host in task.hosts() {
                            self.record(
                                step,
                                worker.lane,
                                ReportEntry::failure(task.clone(), host.clone(), message.clone()),
                                &mut report,
                            );
                        }
                    }
                }
            }
            self.progress.report(&ProgressEvent::StepFinished { step });
        }
        report.set_elapsed(started.elapsed());

        for worker in workers {
            worker.shutdown().await;
        }
        transition(state, RunState::Idle);
        info!(
            total = report.total(),
            failed = report.failed_count(),
            elapsed_ms = report.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    async fn spawn_workers(&self, plan: &ExecutionPlan) -> Result<Vec<LaneWorker>, WorkerError> {
        let mut workers = Vec::with_capacity(plan.lanes().len());
        for planned in plan.lanes() {
            match self.launcher.launch(planned.index) {
                Ok(handle) => workers.push(LaneWorker {
                    lane: planned.index,
                    handle: Some(handle),
                }),
                Err(e) => {
                    error!(lane = planned.index, error = %e, "failed to start worker");
                    for worker in workers {
                        worker.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(workers)
    }

    /// Write the step's request to every lane with a task in this column
    async fn dispatch_step(
        &self,
        step: usize,
        plan: &ExecutionPlan,
        workers: &mut [LaneWorker],
    ) -> Vec<(usize, Arc<Task>, Dispatch)> {
        let mut dispatched = Vec::new();
        for (position, planned) in plan.lanes().iter().enumerate() {
            let Some(task) = planned.lane.task(step) else {
                continue;
            };
            self.progress.report(&ProgressEvent::TaskStarted {
                lane: planned.index,
                step,
                summary: task.to_string(),
                first_in_step: dispatched.is_empty(),
            });

            let worker = &mut workers[position];
            let sent = match worker.handle.as_mut() {
                Some(handle) => Some(handle.send(&Request::from(task.as_ref())).await),
                None => None,
            };
            let dispatch = match sent {
                Some(Ok(())) => {
                    debug!(lane = worker.lane, step, task = %task, "request sent");
                    Dispatch::Sent
                }
                Some(Err(e)) => {
                    warn!(lane = worker.lane, step, error = %e, "failed to send request");
                    worker.retire().await;
                    Dispatch::Unavailable
                }
                None => Dispatch::Unavailable,
            };
            dispatched.push((position, task.clone(), dispatch));
        }
        dispatched
    }

    /// Read replies for `task` until its terminal line
    async fn drain(
        &self,
        step: usize,
        worker: &mut LaneWorker,
        task: &Arc<Task>,
        report: &mut Report,
    ) {
        let lane = worker.lane;
        let wait = task.timeout().saturating_add(self.reply_grace);
        let mut replied: HashSet<String> = HashSet::new();

        loop {
            let Some(handle) = worker.handle.as_mut() else {
                return;
            };
            let next = handle.next_reply(wait).await;
            let (outcome, message) = match next {
                Ok(Some(reply)) => {
                    if self.apply_reply(step, lane, task, reply, &mut replied, report) {
                        return;
                    }
                    continue;
                }
                Ok(None) => {
                    warn!(lane, step, "worker closed its output before the final reply");
                    (Outcome::Failure, WORKER_EXITED_MESSAGE.to_string())
                }
                Err(ReadError::Io(e)) => {
                    warn!(lane, step, error = %e, "failed to read worker output");
                    (Outcome::Failure, WORKER_EXITED_MESSAGE.to_string())
                }
                Err(ReadError::Stalled(wait)) => {
                    warn!(lane, step, wait_secs = wait.as_secs(), "worker stalled");
                    (Outcome::Timeout, stalled_message(wait))
                }
                Err(ReadError::Decode { line, source }) => {
                    warn!(lane, step, line = %line, error = %source, "skipping undecodable reply line");
                    continue;
                }
            };

            for host in task.hosts().iter().filter(|h| !replied.contains(*h)) {
                let entry = match outcome {
                    Outcome::Timeout => ReportEntry::timeout(task.clone(), host.clone(), &message),
                    _ => ReportEntry::failure(task.clone(), host.clone(), &message),
                };
                self.record(step, lane, entry, report);
            }
            worker.retire().await;
            return;
        }
    }

    /// Record one reply; returns whether it ended the task
    fn apply_reply(
        &self,
        step: usize,
        lane: usize,
        task: &Arc<Task>,
        reply: Reply,
        replied: &mut HashSet<String>,
        report: &mut Report,
    ) -> bool {
        match reply {
            Reply::Host {
                hostname,
                success,
                stdout,
                stderr,
                error_message,
            } => {
                replied.insert(hostname.clone());
                let entry = ReportEntry::from_reply(
                    task.clone(),
                    hostname,
                    success,
                    stdout,
                    stderr,
                    error_message,
                );
                self.record(step, lane, entry, report);
                false
            }
            Reply::UserError {
                error_message,
                is_critical,
            } => {
                warn!(
                    lane,
                    step,
                    is_critical,
                    message = error_message.as_deref(),
                    "request rejected"
                );
                let entry = ReportEntry::validation_error(task.clone(), error_message);
                self.record(step, lane, entry, report);
                true
            }
            Reply::Final {
                timed_out_hosts,
                total_time,
            } => {
                debug!(lane, step, total_time, timed_out = timed_out_hosts.len(), "final reply");
                for host in timed_out_hosts.into_keys() {
                    let entry = ReportEntry::timeout(task.clone(), host, TIMEOUT_MESSAGE);
                    self.record(step, lane, entry, report);
                }
                true
            }
            Reply::Unknown => {
                debug!(lane, step, "ignoring reply of unknown type");
                false
            }
        }
    }

    fn record(&self, step: usize, lane: usize, entry: ReportEntry, report: &mut Report) {
        self.progress.report(&ProgressEvent::HostOutcome {
            lane,
            step,
            host: entry.host.clone(),
            outcome: entry.outcome,
        });
        report.push(entry);
    }
}
