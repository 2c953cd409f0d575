//! Worker process binding
//!
//! Each lane owns one long-lived worker that reads request lines on stdin
//! and writes reply lines on stdout.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gantry_core::error::WorkerError;
use gantry_core::WorkerConfig;

use crate::protocol::{decode_reply, encode_request, Reply, Request};

/// How long a worker may take to exit after its input is closed
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Command line used to start a worker
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    config: WorkerConfig,
}

impl WorkerCommand {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn program(&self) -> &str {
        &self.config.program
    }

    /// Leading arguments followed by the login and tuning flags
    pub fn args(&self) -> Vec<String> {
        let config = &self.config;
        let mut args = config.args.clone();
        args.push("-l".to_string());
        args.push(config.user.clone());
        if let Some(identity) = &config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        if let Some(sessions) = config.max_sessions {
            args.push("-c".to_string());
            args.push(sessions.to_string());
        }
        if let Some(connections) = config.max_agent_connections {
            args.push("-m".to_string());
            args.push(connections.to_string());
        }
        args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command.args(self.args());
        for (key, value) in &self.config.env {
            if value.is_empty() {
                command.env_remove(key);
            } else {
                command.env(key, value);
            }
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl From<WorkerConfig> for WorkerCommand {
    fn from(config: WorkerConfig) -> Self {
        Self::new(config)
    }
}

/// Errors while reading one reply line
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no reply line within {0:?}")]
    Stalled(Duration),

    #[error("failed to read worker output: {0}")]
    Io(#[from] io::Error),

    #[error("undecodable reply line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Starts the worker for a lane
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, lane: usize) -> Result<WorkerHandle, WorkerError>;
}

/// Launches real worker processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    pub fn new(command: impl Into<WorkerCommand>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

impl WorkerLauncher for ProcessLauncher {
    /// Must be called from within a tokio runtime.
    fn launch(&self, lane: usize) -> Result<WorkerHandle, WorkerError> {
        let child = self
            .command
            .command()
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                lane,
                program: self.command.program().to_string(),
                source,
            })?;

        debug!(
            lane,
            program = self.command.program(),
            pid = child.id(),
            "worker started"
        );
        WorkerHandle::from_child(lane, child)
    }
}

/// Request/reply channel to one worker
pub struct WorkerHandle {
    lane: usize,
    input: Option<BoxedWrite>,
    output: BufReader<BoxedRead>,
    line: Vec<u8>,
    child: Option<Child>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("lane", &self.lane)
            .field("open", &self.input.is_some())
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

impl WorkerHandle {
    /// Handle over arbitrary streams, with no process attached
    pub fn from_streams<W, R>(lane: usize, input: W, output: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let output: BoxedRead = Box::new(output);
        Self {
            lane,
            input: Some(Box::new(input)),
            output: BufReader::new(output),
            line: Vec::new(),
            child: None,
            stderr_drain: None,
        }
    }

    /// Take the piped streams of a spawned worker; stderr is drained into
    /// debug logs.
    pub fn from_child(lane: usize, mut child: Child) -> Result<Self, WorkerError> {
        let stdin = child.stdin.take().ok_or(WorkerError::MissingPipe {
            lane,
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(WorkerError::MissingPipe {
            lane,
            pipe: "stdout",
        })?;

        let stderr_drain = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(lane, line = %line, "worker stderr");
                }
            })
        });

        let mut handle = Self::from_streams(lane, stdin, stdout);
        handle.child = Some(child);
        handle.stderr_drain = stderr_drain;
        Ok(handle)
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Write one request line and flush it
    pub async fn send(&mut self, request: &Request) -> io::Result<()> {
        let line = encode_request(request).map_err(io::Error::other)?;
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "worker input is closed"))?;
        input.write_all(line.as_bytes()).await?;
        input.flush().await
    }

    /// Next non-blank reply line, waiting at most `wait` for each line.
    ///
    /// Invalid UTF-8 is replaced rather than treated as a read failure, so a
    /// corrupt line surfaces as [`ReadError::Decode`]. Returns `Ok(None)`
    /// once the worker closes its output.
    pub async fn next_reply(&mut self, wait: Duration) -> Result<Option<Reply>, ReadError> {
        loop {
            let read = tokio::time::timeout(wait, self.output.read_until(b'\n', &mut self.line));
            let n = match read.await {
                Err(_) => return Err(ReadError::Stalled(wait)),
                Ok(result) => result?,
            };
            if n == 0 {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.line)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            self.line.clear();
            if line.trim().is_empty() {
                continue;
            }
            return decode_reply(&line)
                .map(Some)
                .map_err(|source| ReadError::Decode { line, source });
        }
    }

    /// Close the input and wait for the worker to exit, killing it after
    /// [`SHUTDOWN_GRACE`].
    pub async fn shutdown(mut self) {
        self.input.take();
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(lane = self.lane, %status, "worker exited"),
                Ok(Err(e)) => warn!(lane = self.lane, error = %e, "failed to wait for worker"),
                Err(_) => {
                    warn!(lane = self.lane, "worker did not exit in time, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(lane = self.lane, error = %e, "failed to kill worker");
                    }
                }
            }
        }
        if let Some(drain) = self.stderr_drain.take() {
            drain.abort();
        }
    }

    /// Kill the worker without waiting for a clean exit
    pub async fn kill(mut self) {
        self.input.take();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(lane = self.lane, error = %e, "failed to kill worker");
            }
        }
        if let Some(drain) = self.stderr_drain.take() {
            drain.abort();
        }
    }
}
