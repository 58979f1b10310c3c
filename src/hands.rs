//! The bridge to the execution worker: one child process speaking
//! newline-delimited JSON over stdin/stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::types::{WorkerCommand, WorkerResponse, WorkerStatus};

/// Anything that accepts a worker command and answers with one response.
///
/// Implementations handle exactly one request at a time.
#[allow(async_fn_in_trait)]
pub trait Worker {
    async fn send(&mut self, command: &WorkerCommand) -> Result<WorkerResponse, WorkerError>;

    /// Shut the worker down. Must be safe to call more than once.
    async fn stop(&mut self);
}

/// How to launch the worker process.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Upper bound on waiting for the handshake line.
    pub startup_timeout: Duration,
}

impl WorkerSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            startup_timeout: Duration::from_secs(60),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// A running worker process. Created once per run.
pub struct WorkerBridge {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl WorkerBridge {
    /// Spawn the worker and wait for its `{"status":"ok"}` greeting.
    ///
    /// On any failure the child is killed before the error is returned.
    pub async fn start(spec: &WorkerSpec) -> Result<Self, WorkerError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        info!(program = %spec.program, args = ?spec.args, "starting worker");
        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let mut bridge = Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(BufReader::new),
            child: Some(child),
        };

        let handshake = tokio::time::timeout(spec.startup_timeout, bridge.read_response())
            .await
            .unwrap_or(Err(WorkerError::Timeout(spec.startup_timeout)));

        let failure = match handshake {
            Ok(hello) if hello.status == WorkerStatus::Ok => {
                info!(message = ?hello.message, "worker started");
                return Ok(bridge);
            }
            Ok(hello) => WorkerError::Handshake {
                reason: hello
                    .message
                    .unwrap_or_else(|| "worker reported an error".to_string()),
            },
            Err(err) => WorkerError::Handshake {
                reason: err.to_string(),
            },
        };

        warn!(error = %failure, "worker failed to start");
        bridge.kill().await;
        Err(failure)
    }

    async fn read_response(&mut self) -> Result<WorkerResponse, WorkerError> {
        let stdout = self.stdout.as_mut().ok_or(WorkerError::NotRunning)?;
        let mut line = String::new();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(WorkerError::Closed);
        }
        let line = line.trim();
        debug!(line, "worker response");
        serde_json::from_str(line).map_err(|source| WorkerError::Malformed {
            line: line.to_string(),
            source,
        })
    }

    async fn write_command(&mut self, command: &WorkerCommand) -> Result<(), WorkerError> {
        let stdin = self.stdin.as_mut().ok_or(WorkerError::NotRunning)?;
        let mut data = serde_json::to_vec(command).map_err(std::io::Error::from)?;
        data.push(b'\n');
        stdin.write_all(&data).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn kill(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "worker already gone");
            }
        }
    }
}

impl Worker for WorkerBridge {
    async fn send(&mut self, command: &WorkerCommand) -> Result<WorkerResponse, WorkerError> {
        debug!(action = %command.action, args = ?command.args, "worker command");
        self.write_command(command).await?;
        self.read_response().await
    }

    async fn stop(&mut self) {
        if self.child.is_none() {
            return;
        }
        if self.stdin.is_some() {
            // The goodbye line is informational only.
            let _ = tokio::time::timeout(
                Duration::from_secs(5),
                self.send(&WorkerCommand::exit()),
            )
            .await;
        }
        self.kill().await;
        info!("worker stopped");
    }
}
