//! Gantry Tasks - Lane-parallel remote task engine
//!
//! This crate queues remote commands and file uploads against a registry of
//! grouped hosts, lays them out in step-aligned lanes and runs every lane
//! through its own long-lived SSH worker process.

pub mod deployer;
pub mod driver;
pub mod lanes;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod task;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use deployer::Deployer;
pub use driver::{Driver, RunState};
pub use lanes::{ExecutionPlan, Lane, LaneMatrix, Placement, PlannedLane};
pub use progress::{
    CollectingProgress, NoProgress, ProgressEvent, ProgressRegistry, ProgressSink, TextProgress,
    TracingProgress,
};
pub use protocol::{Reply, Request};
pub use registry::{HostEntry, HostRegistry};
pub use report::{Outcome, Report, ReportEntry, ReportSummary};
pub use task::{Task, TaskKind};
pub use worker::{ProcessLauncher, ReadError, WorkerCommand, WorkerHandle, WorkerLauncher};
