//! Deployer facade: host registry, task queue and run entry point

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{debug, info};

use gantry_core::error::{Result, StateError, TaskError};
use gantry_core::{Config, StepConfig, TaskDefaults, WorkerConfig};

use crate::driver::{Driver, RunState};
use crate::lanes::LaneMatrix;
use crate::progress::ProgressSink;
use crate::registry::HostRegistry;
use crate::report::Report;
use crate::task::Task;
use crate::worker::{ProcessLauncher, WorkerLauncher};

/// Resets the run state when a run ends, cancelled runs included
struct RunGuard<'a> {
    state: &'a mut RunState,
}

impl<'a> RunGuard<'a> {
    fn enter(state: &'a mut RunState) -> Self {
        *state = RunState::Preparing;
        Self { state }
    }
}

impl Deref for RunGuard<'_> {
    type Target = RunState;

    fn deref(&self) -> &RunState {
        self.state
    }
}

impl DerefMut for RunGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunState {
        self.state
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state = RunState::Idle;
    }
}

/// Queues tasks against registered hosts and runs them lane by lane
pub struct Deployer {
    registry: HostRegistry,
    lanes: LaneMatrix,
    report: Report,
    state: RunState,
    defaults: TaskDefaults,
    launcher: Arc<dyn WorkerLauncher>,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("hosts", &self.registry.len())
            .field("pending", &self.lanes.has_pending_work())
            .field("state", &self.state)
            .field("entries", &self.report.total())
            .finish()
    }
}

impl Deployer {
    /// Deployer launching real worker processes
    pub fn new(worker: WorkerConfig, defaults: TaskDefaults) -> Self {
        Self::with_launcher(Arc::new(ProcessLauncher::new(worker)), defaults)
    }

    pub fn with_launcher(launcher: Arc<dyn WorkerLauncher>, defaults: TaskDefaults) -> Self {
        Self {
            registry: HostRegistry::new(),
            lanes: LaneMatrix::new(),
            report: Report::new(),
            state: RunState::Idle,
            defaults,
            launcher,
        }
    }

    /// Deployer with the configured worker, defaults and hosts
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut deployer = Self::new(config.worker.clone(), config.defaults);
        for host in &config.hosts {
            deployer.add_host(host.name.as_str(), host.groups.iter().map(String::as_str))?;
        }
        Ok(deployer)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(StateError::AlreadyRunning.into())
        }
    }

    /// Register a host; re-adding replaces its groups
    pub fn add_host<I, S>(&mut self, host: impl Into<String>, groups: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_idle()?;
        self.registry.add(host, groups)?;
        Ok(self)
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn hosts(&self) -> Vec<String> {
        self.registry.hosts()
    }

    pub fn hosts_in_group(&self, group: &str) -> Vec<String> {
        self.registry.hosts_in_group(group)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.registry.has_group(group)
    }

    /// Timeout in seconds for tasks queued without one
    pub fn default_timeout(&self) -> u64 {
        self.defaults.timeout_secs
    }

    pub fn set_default_timeout(&mut self, secs: u64) -> Result<&mut Self> {
        self.ensure_idle()?;
        if secs == 0 {
            return Err(TaskError::InvalidParameter {
                field: "timeout".to_string(),
                message: "default timeout must be positive".to_string(),
            }
            .into());
        }
        self.defaults.timeout_secs = secs;
        Ok(self)
    }

    pub fn defaults(&self) -> &TaskDefaults {
        &self.defaults
    }

    /// Queue a remote command
    pub fn command(
        &mut self,
        command: impl Into<String>,
        group: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<&mut Self> {
        self.ensure_idle()?;
        let task = Task::execute(
            &self.registry,
            command,
            group,
            timeout_secs,
            self.defaults.timeout_secs,
        )?;
        self.enqueue(task)
    }

    /// Queue a file upload
    pub fn upload(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        group: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<&mut Self> {
        self.ensure_idle()?;
        let task = Task::transfer(
            &self.registry,
            source,
            target,
            group,
            timeout_secs,
            self.defaults.timeout_secs,
        )?;
        self.enqueue(task)
    }

    fn enqueue(&mut self, task: Task) -> Result<&mut Self> {
        let placement = self.lanes.push(task)?;
        debug!(lane = placement.lane, column = placement.column, "task queued");
        Ok(self)
    }

    /// Start a new lane; no-op while the active lane is empty
    pub fn new_lane(&mut self) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.lanes.new_lane()?;
        Ok(self)
    }

    pub fn begin_parallel(&mut self) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.lanes.begin_parallel()?;
        Ok(self)
    }

    pub fn end_parallel(&mut self) -> Result<&mut Self> {
        self.ensure_idle()?;
        self.lanes.end_parallel()?;
        Ok(self)
    }

    /// Queue the tasks added by `build` as one parallel block
    pub fn parallel<F>(&mut self, build: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.begin_parallel()?;
        let built = build(self);
        self.lanes.end_parallel()?;
        built?;
        Ok(self)
    }

    /// Queue one playbook step
    pub fn queue(&mut self, step: &StepConfig) -> Result<&mut Self> {
        match step {
            StepConfig::Command {
                run,
                group,
                timeout,
            } => self.command(run.as_str(), group.as_deref(), *timeout),
            StepConfig::Upload {
                source,
                target,
                group,
                timeout,
            } => self.upload(source.as_str(), target.as_str(), group.as_deref(), *timeout),
            StepConfig::Lane => self.new_lane(),
            StepConfig::Parallel { steps } => self.parallel(|deployer| {
                for step in steps {
                    deployer.queue(step)?;
                }
                Ok(())
            }),
        }
    }

    /// Whether any real task is queued
    pub fn has_tasks(&self) -> bool {
        self.lanes.has_pending_work()
    }

    pub fn lanes(&self) -> &LaneMatrix {
        &self.lanes
    }

    pub fn is_running(&self) -> bool {
        !self.state.is_idle()
    }

    /// Run every queued task and keep the report.
    ///
    /// The queue is emptied whatever the outcome. Only a worker that cannot
    /// be started fails the run; host failures end up in the report.
    pub async fn run(&mut self, progress: &dyn ProgressSink) -> Result<&Report> {
        self.ensure_idle()?;
        let plan = self.lanes.take_plan();
        self.report = Report::new();
        info!(
            lanes = plan.lanes().len(),
            steps = plan.steps(),
            tasks = plan.task_count(),
            "running queued tasks"
        );

        let report = {
            let mut guard = RunGuard::enter(&mut self.state);
            Driver::new(self.launcher.as_ref(), progress)
                .with_defaults(&self.defaults)
                .execute(plan, &mut guard)
                .await?
        };
        self.report = report;
        Ok(&self.report)
    }

    /// Report of the last run
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn is_successful(&self) -> bool {
        self.report.is_successful()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::error::{GantryError, ReportError, WorkerError};
    use gantry_core::HostConfig;

    use crate::progress::{CollectingProgress, NoProgress};
    use crate::protocol::Request;
    use crate::report::Outcome;
    use crate::test_support::{all_succeed, final_reply, host_reply, ScriptedLauncher};

    const FIXTURE: &str = "/srv/fixtures/files/1.txt";

    fn deployer_with(launcher: Arc<ScriptedLauncher>) -> Deployer {
        let mut deployer = Deployer::with_launcher(launcher, TaskDefaults::default());
        deployer
            .add_host("remote_1", ["app", "all"])
            .unwrap()
            .add_host("remote_2", ["app", "all"])
            .unwrap()
            .add_host("remote_3", ["job", "all"])
            .unwrap();
        deployer
    }

    fn fixture_worker() -> ScriptedLauncher {
        ScriptedLauncher::new(|_, request| match request {
            Request::Ssh { cmd, hosts, .. } if cmd == "ls -a" => {
                let mut lines: Vec<String> = hosts
                    .iter()
                    .map(|h| host_reply(h, true, ".\n..\n1.txt\n", ""))
                    .collect();
                lines.push(final_reply(&[]));
                Some(lines)
            }
            Request::Ssh { cmd, hosts, .. } if cmd == "cat 2.txt" => Some(vec![
                host_reply(&hosts[0], false, "", "cat: 2.txt: No such file or directory\n"),
                final_reply(&[]),
            ]),
            Request::Scp { target, hosts, .. } if target.starts_with("/missing/") => Some(vec![
                host_reply(
                    &hosts[0],
                    false,
                    "",
                    "scp: /missing/1.txt: No such file or directory\n",
                ),
                final_reply(&[]),
            ]),
            _ => Some(all_succeed(request)),
        })
    }

    #[tokio::test]
    async fn test_single_command_output() {
        let launcher = Arc::new(fixture_worker());
        let mut deployer = deployer_with(launcher.clone());
        deployer.command("ls -a", Some("job"), None).unwrap();
        assert!(deployer.has_tasks());

        let progress = CollectingProgress::default();
        let report = deployer.run(&progress).await.unwrap();

        assert_eq!(progress.text(), "CMD ls -a .\n");
        let summary = report.summary();
        assert_eq!((summary.total, summary.successful, summary.failed), (1, 1, 0));
        assert_eq!(report.single_output(), Ok(Some(".\n..\n1.txt\n")));
        assert!(deployer.is_successful());
        assert!(!deployer.has_tasks());
    }

    #[tokio::test]
    async fn test_sequential_scenario() {
        let launcher = Arc::new(fixture_worker());
        let mut deployer = deployer_with(launcher.clone());
        deployer
            .upload(FIXTURE, "1.txt", Some("job"), None)
            .unwrap()
            .command("ls -a", None, None)
            .unwrap()
            .command("cat 2.txt", Some("job"), None)
            .unwrap()
            .command("rm 1.txt", Some("job"), None)
            .unwrap();

        let progress = CollectingProgress::default();
        deployer.run(&progress).await.unwrap();

        assert_eq!(
            progress.text(),
            format!(
                "CPY {} -> 1.txt .\nCMD ls -a ...\nCMD cat 2.txt E\nCMD rm 1.txt .\n",
                FIXTURE
            )
        );
        let summary = deployer.report().summary();
        assert_eq!((summary.total, summary.successful, summary.failed), (6, 5, 1));
        assert!(!deployer.is_successful());

        let failed = deployer.report().failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task.command(), Some("cat 2.txt"));
        assert_eq!(
            deployer.report().single_output(),
            Err(ReportError::MultipleEntries(6))
        );
    }

    #[tokio::test]
    async fn test_upload_to_missing_directory_is_not_fatal() {
        let launcher = Arc::new(fixture_worker());
        let mut deployer = deployer_with(launcher);
        deployer
            .upload(FIXTURE, "/missing/1.txt", Some("job"), None)
            .unwrap();

        let report = deployer.run(&NoProgress).await.unwrap();
        let summary = report.summary();
        assert_eq!((summary.total, summary.successful, summary.failed), (1, 0, 1));
        assert_eq!(
            report.failed()[0].error_output(),
            Some("scp: /missing/1.txt: No such file or directory\n")
        );
    }

    #[tokio::test]
    async fn test_request_carries_timeout_in_millis() {
        let launcher = Arc::new(ScriptedLauncher::succeeding());
        let mut deployer = deployer_with(launcher.clone());
        deployer.set_default_timeout(10).unwrap();
        deployer
            .command("uptime", Some("job"), None)
            .unwrap()
            .command("uptime", Some("job"), Some(3))
            .unwrap();

        deployer.run(&NoProgress).await.unwrap();

        let timeouts: Vec<u64> = launcher
            .requests()
            .iter()
            .map(|(_, request)| match request {
                Request::Ssh { timeout, .. } | Request::Scp { timeout, .. } => *timeout,
            })
            .collect();
        assert_eq!(timeouts, vec![10_000, 3_000]);
    }

    #[test]
    fn test_debug_summary() {
        let deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));
        let debug = format!("{:?}", deployer);
        assert!(debug.starts_with("Deployer {"));
        assert!(debug.contains("state: Idle"));
    }

    #[test]
    fn test_invalid_group_rejected_before_queueing() {
        let mut deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));

        let err = deployer.command("uptime", Some("db"), None).unwrap_err();
        assert!(matches!(err, GantryError::Task(TaskError::InvalidGroup(ref g)) if g == "db"));
        assert_eq!(err.to_string(), "Not found servers for group \"db\"");

        assert!(deployer.upload("a", "b", Some("db"), None).is_err());
        assert!(!deployer.has_tasks());
    }

    #[test]
    fn test_zero_default_timeout_rejected() {
        let mut deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));
        assert!(deployer.set_default_timeout(0).is_err());
        assert_eq!(deployer.default_timeout(), 3600);
    }

    #[test]
    fn test_mutation_while_running_rejected() {
        let mut deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));
        deployer.state = RunState::Running(0);

        assert!(matches!(
            deployer.command("uptime", None, None),
            Err(GantryError::State(StateError::AlreadyRunning))
        ));
        assert!(deployer.add_host("remote_4", ["app"]).is_err());
        assert!(deployer.new_lane().is_err());
        assert!(deployer.is_running());
    }

    #[tokio::test]
    async fn test_run_while_running_rejected() {
        let mut deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));
        deployer.command("uptime", None, None).unwrap();
        deployer.state = RunState::Draining(0);

        let err = deployer.run(&NoProgress).await.unwrap_err();
        assert_eq!(err.to_string(), "Deployer is already running");
        assert!(deployer.has_tasks());
    }

    #[tokio::test]
    async fn test_parallel_block_runs_side_by_side() {
        let launcher = Arc::new(ScriptedLauncher::succeeding());
        let mut deployer = deployer_with(launcher.clone());
        deployer
            .command("prepare", Some("job"), None)
            .unwrap()
            .parallel(|d| {
                d.command("build", Some("job"), None)?;
                d.command("migrate", Some("app"), None)?;
                Ok(())
            })
            .unwrap()
            .command("finish", Some("job"), None)
            .unwrap();

        let progress = CollectingProgress::default();
        deployer.run(&progress).await.unwrap();

        assert_eq!(
            progress.text(),
            "CMD prepare .\nCMD build \nCMD migrate ...\nCMD finish .\n"
        );
        assert_eq!(launcher.launched(), vec![0, 1]);
        assert!(!deployer.lanes().in_parallel());
    }

    #[test]
    fn test_failed_parallel_block_is_closed() {
        let mut deployer = deployer_with(Arc::new(ScriptedLauncher::succeeding()));
        let result = deployer.parallel(|d| {
            d.command("build", Some("db"), None)?;
            Ok(())
        });

        assert!(result.is_err());
        assert!(!deployer.lanes().in_parallel());
        assert!(deployer.begin_parallel().is_ok());
        assert!(matches!(
            deployer.begin_parallel(),
            Err(GantryError::Task(TaskError::ParallelBlock(_)))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_clears_queue_and_report() {
        let launcher = Arc::new(ScriptedLauncher::succeeding().failing_on(0));
        let mut deployer = deployer_with(launcher);
        deployer.command("uptime", None, None).unwrap();

        let err = deployer.run(&NoProgress).await.unwrap_err();
        assert!(matches!(err, GantryError::Worker(WorkerError::Spawn { .. })));
        assert!(!deployer.has_tasks());
        assert!(!deployer.is_running());
        assert_eq!(deployer.report().total(), 0);
    }

    #[tokio::test]
    async fn test_report_replaced_by_next_run() {
        let launcher = Arc::new(ScriptedLauncher::succeeding());
        let mut deployer = deployer_with(launcher);

        deployer.command("uptime", None, None).unwrap();
        deployer.run(&NoProgress).await.unwrap();
        assert_eq!(deployer.report().total(), 3);

        deployer.command("uptime", Some("job"), None).unwrap();
        deployer.run(&NoProgress).await.unwrap();
        assert_eq!(deployer.report().total(), 1);
        assert!(!deployer.is_running());
    }

    #[tokio::test]
    async fn test_queue_playbook_steps() {
        let launcher = Arc::new(ScriptedLauncher::succeeding());
        let mut deployer = deployer_with(launcher.clone());
        let steps = vec![
            StepConfig::Upload {
                source: FIXTURE.to_string(),
                target: "1.txt".to_string(),
                group: Some("job".to_string()),
                timeout: None,
            },
            StepConfig::Parallel {
                steps: vec![
                    StepConfig::Command {
                        run: "a".to_string(),
                        group: Some("job".to_string()),
                        timeout: Some(5),
                    },
                    StepConfig::Command {
                        run: "b".to_string(),
                        group: Some("app".to_string()),
                        timeout: None,
                    },
                ],
            },
            StepConfig::Lane,
            StepConfig::Command {
                run: "c".to_string(),
                group: None,
                timeout: None,
            },
        ];
        for step in &steps {
            deployer.queue(step).unwrap();
        }
        assert_eq!(deployer.lanes().len(), 3);

        let report = deployer.run(&NoProgress).await.unwrap();
        assert_eq!(report.total(), 1 + 1 + 2 + 3);
        assert!(report.entries().iter().all(|e| e.outcome == Outcome::Success));
    }

    #[test]
    fn test_from_config_registers_hosts() {
        let config = Config {
            hosts: vec![
                HostConfig {
                    name: "web1:2222".to_string(),
                    groups: vec!["web".to_string()],
                },
                HostConfig {
                    name: "db1".to_string(),
                    groups: vec![],
                },
            ],
            ..Default::default()
        };

        let deployer = Deployer::from_config(&config).unwrap();
        assert_eq!(deployer.hosts(), vec!["web1:2222", "db1"]);
        assert_eq!(deployer.hosts_in_group("web"), vec!["web1:2222"]);
        assert!(deployer.has_group("web"));
        assert!(!deployer.has_group("db"));
        assert!(!deployer.is_running());
    }
}
