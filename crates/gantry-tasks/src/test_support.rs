//! Test-only in-memory workers.

use std::io;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use gantry_core::error::WorkerError;

use crate::protocol::Request;
use crate::worker::{WorkerHandle, WorkerLauncher};

/// Reply line that makes the worker exit instead of writing it
pub const EXIT: &str = "<exit>";

/// Reply line that is written as bytes that are not UTF-8
pub const INVALID_UTF8: &str = "<invalid-utf8>";

/// Reply lines for a request, or `None` to make the worker exit
type Script = dyn Fn(usize, &Request) -> Option<Vec<String>> + Send + Sync;

/// Launches in-memory workers driven by a script
pub struct ScriptedLauncher {
    script: Arc<Script>,
    fail_lane: Option<usize>,
    requests: Arc<Mutex<Vec<(usize, Request)>>>,
    launched: Mutex<Vec<usize>>,
}

impl ScriptedLauncher {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &Request) -> Option<Vec<String>> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            fail_lane: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Worker that lets every host succeed with empty output
    pub fn succeeding() -> Self {
        Self::new(|_, request| Some(all_succeed(request)))
    }

    /// Refuse to launch the worker for `lane`
    pub fn failing_on(mut self, lane: usize) -> Self {
        self.fail_lane = Some(lane);
        self
    }

    /// Requests received so far, with the lane that received them
    pub fn requests(&self) -> Vec<(usize, Request)> {
        self.requests.lock().unwrap().clone()
    }

    /// Lanes launched so far
    pub fn launched(&self) -> Vec<usize> {
        self.launched.lock().unwrap().clone()
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(&self, lane: usize) -> Result<WorkerHandle, WorkerError> {
        if self.fail_lane == Some(lane) {
            return Err(WorkerError::Spawn {
                lane,
                program: "scripted".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such worker"),
            });
        }
        self.launched.lock().unwrap().push(lane);

        let (client, worker) = tokio::io::duplex(64 * 1024);
        let (worker_read, mut worker_write) = tokio::io::split(worker);
        let script = self.script.clone();
        let requests = self.requests.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(worker_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<Request>(&line) else {
                    break;
                };
                requests.lock().unwrap().push((lane, request.clone()));
                let Some(replies) = script(lane, &request) else {
                    break;
                };
                for reply in replies {
                    if reply == EXIT {
                        return;
                    }
                    let bytes: &[u8] = if reply == INVALID_UTF8 {
                        b"\xff\xfe not utf8"
                    } else {
                        reply.as_bytes()
                    };
                    if worker_write.write_all(bytes).await.is_err()
                        || worker_write.write_all(b"\n").await.is_err()
                    {
                        return;
                    }
                }
                if worker_write.flush().await.is_err() {
                    return;
                }
            }
        });

        let (client_read, client_write) = tokio::io::split(client);
        Ok(WorkerHandle::from_streams(lane, client_write, client_read))
    }
}

pub fn host_reply(host: &str, success: bool, stdout: &str, stderr: &str) -> String {
    serde_json::json!({
        "Type": "Reply",
        "Hostname": host,
        "Success": success,
        "Stdout": stdout,
        "Stderr": stderr,
        "ErrMsg": "",
    })
    .to_string()
}

/// Failed reply the way a worker reports an unreachable host
pub fn connection_error(host: &str, message: &str) -> String {
    serde_json::json!({
        "Type": "Reply",
        "Hostname": host,
        "Success": false,
        "Stdout": "",
        "Stderr": "",
        "ErrMsg": message,
    })
    .to_string()
}

pub fn final_reply(timed_out: &[&str]) -> String {
    let hosts: serde_json::Map<String, serde_json::Value> = timed_out
        .iter()
        .map(|host| (host.to_string(), serde_json::Value::Bool(true)))
        .collect();
    serde_json::json!({
        "Type": "FinalReply",
        "TotalTime": 0.1,
        "TimedOutHosts": hosts,
    })
    .to_string()
}

pub fn user_error(message: &str) -> String {
    serde_json::json!({
        "Type": "UserError",
        "IsCritical": false,
        "ErrorMsg": message,
    })
    .to_string()
}

/// A success line per host followed by the final reply
pub fn all_succeed(request: &Request) -> Vec<String> {
    let mut lines: Vec<String> = request
        .hosts()
        .iter()
        .map(|host| host_reply(host, true, "", ""))
        .collect();
    lines.push(final_reply(&[]));
    lines
}
