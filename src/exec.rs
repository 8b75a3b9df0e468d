//! Server-side benchmark execution.
//!
//! One run at a time: the runner holds a single slot with the active
//! child's process-group id. The child is launched through `bash -c` in
//! its own process group so a stop request can take down the whole mpirun
//! tree, not just the shell.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};

use crate::config::LauncherConfig;
use crate::params::BenchParams;
use crate::run::{RunResponse, StopResponse};
use crate::script::render_script;

/// Events a streaming run emits, in order: one `Command`, any number of
/// `Output` lines, then exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Command(String),
    Output(String),
    Done,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("a benchmark run is already in progress")]
    Busy,

    #[error("failed to launch benchmark: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct JobRunner {
    launcher: LauncherConfig,
    /// Process-group id of the active run, if any.
    current: Arc<Mutex<Option<u32>>>,
}

impl JobRunner {
    pub fn new(launcher: LauncherConfig) -> Self {
        Self {
            launcher,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        self.current.lock().expect("job slot lock poisoned")
    }

    /// Launch a streaming run. Stdout and stderr are merged; every line
    /// becomes one `Output` event. The channel closes after the terminal
    /// event.
    pub fn spawn_stream(
        &self,
        params: &BenchParams,
        hostfile: &Path,
    ) -> Result<mpsc::Receiver<JobEvent>, ExecError> {
        let command = render_script(params, hostfile, &self.launcher);

        let (mut child, pid) = {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(ExecError::Busy);
            }
            let child = Command::new("bash")
                .arg("-c")
                .arg(format!("{command} 2>&1"))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .process_group(0)
                .spawn()?;
            let pid = child.id().ok_or_else(pid_gone)?;
            *slot = Some(pid);
            (child, pid)
        };

        info!(%pid, "benchmark run started");

        let stdout = child.stdout.take();
        let (tx, rx) = mpsc::channel(64);
        let slot = Arc::clone(&self.current);
        tokio::spawn(async move {
            let _ = tx.send(JobEvent::Command(command)).await;

            if let Some(stdout) = stdout {
                let mut lines = FramedRead::new(stdout, LinesCodec::new());
                while let Some(line) = lines.next().await {
                    match line {
                        Ok(line) => {
                            // Keep draining even if the client went away so
                            // the child is not blocked on a full pipe.
                            let _ = tx.send(JobEvent::Output(line)).await;
                        }
                        Err(err) => {
                            warn!(%err, "error reading benchmark output");
                            break;
                        }
                    }
                }
            }

            let event = match child.wait().await {
                Ok(status) if status.success() => JobEvent::Done,
                Ok(status) => JobEvent::Failed(format!("benchmark exited with {status}")),
                Err(err) => JobEvent::Failed(format!("failed to reap benchmark: {err}")),
            };
            info!(%pid, ?event, "benchmark run finished");
            let _ = tx.send(event).await;
            *slot.lock().expect("job slot lock poisoned") = None;
        });

        Ok(rx)
    }

    /// Run to completion with a timeout, capturing output. Stdout and
    /// stderr are kept separate so failures can surface both.
    pub async fn run_blocking(
        &self,
        params: &BenchParams,
        hostfile: &Path,
    ) -> Result<RunResponse, ExecError> {
        let command = render_script(params, hostfile, &self.launcher);
        let timeout_secs = if params.timeout_secs > 0 {
            params.timeout_secs
        } else {
            self.launcher.default_timeout_secs
        };

        // Guard scope ends before the first await so the returned future
        // stays Send.
        let (mut child, pid) = {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(ExecError::Busy);
            }
            let child = Command::new("bash")
                .arg("-c")
                .arg(&command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0)
                .spawn()?;
            let pid = child.id().ok_or_else(pid_gone)?;
            *slot = Some(pid);
            (child, pid)
        };

        info!(%pid, timeout_secs, "blocking benchmark run started");

        let stdout_task = tokio::spawn(read_to_end(child.stdout.take()));
        let stderr_task = tokio::spawn(read_to_end(child.stderr.take()));

        let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

        let mut response = RunResponse {
            status: RunResponse::STATUS_SUCCESS.to_string(),
            output: String::new(),
            command,
            error: None,
        };
        match waited {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => {
                response.status = RunResponse::STATUS_ERROR.to_string();
                response.error = Some(format!("benchmark exited with {status}"));
            }
            Ok(Err(err)) => {
                response.status = RunResponse::STATUS_ERROR.to_string();
                response.error = Some(format!("failed to reap benchmark: {err}"));
            }
            Err(_) => {
                // Deadline passed: kill the whole group, then reap.
                if let Err(err) = kill_process_group(pid).await {
                    warn!(%pid, %err, "failed to kill timed-out run");
                }
                let _ = child.wait().await;
                response.status = RunResponse::STATUS_TIMEOUT.to_string();
                response.error = Some(format!("command timed out after {timeout_secs} seconds"));
            }
        }

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        response.output = if response.status == RunResponse::STATUS_SUCCESS {
            if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n--- STDERR ---\n{stderr}")
            }
        } else {
            format!("{stdout}\n{stderr}")
        };

        *self.slot() = None;
        info!(%pid, status = %response.status, "blocking benchmark run finished");
        Ok(response)
    }

    /// Kill the active run's process group, if any.
    pub async fn stop(&self) -> StopResponse {
        let pid = self.slot().take();
        match pid {
            None => StopResponse::no_task("no benchmark run to stop"),
            Some(pid) => match kill_process_group(pid).await {
                Ok(()) => {
                    info!(%pid, "benchmark run stopped");
                    StopResponse::stopped("benchmark run stopped")
                }
                Err(err) => {
                    warn!(%pid, %err, "failed to kill process group");
                    StopResponse {
                        status: "error".to_string(),
                        message: Some(format!("failed to kill process group: {err}")),
                    }
                }
            },
        }
    }
}

async fn read_to_end(pipe: Option<impl AsyncRead + Unpin>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf).await;
    }
    buf
}

/// A child with no pid has already been reaped; storing a zero would make
/// the stop path signal the server's own process group.
fn pid_gone() -> ExecError {
    ExecError::Spawn(std::io::Error::other(
        "benchmark process exited before its pid was recorded",
    ))
}

/// SIGKILL the whole process group (negative pid addresses the group).
async fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let status = Command::new("kill")
        .args(["-9", "--", &format!("-{pid}")])
        .status()
        .await?;
    if !status.success() {
        return Err(std::io::Error::other(format!("kill exited with {status}")));
    }
    Ok(())
}
