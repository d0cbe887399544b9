//! Managed OS process for one launch unit

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not started yet
    Pending,
    Running,
    /// Exited with an optional exit code (None when killed by a signal)
    Stopped(Option<i32>),
    /// Failed to spawn
    Failed,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Command line of a launch unit
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Unit id (for logging and events)
    pub id: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Extra environment on top of the launcher's
    pub env: HashMap<String, String>,
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started { pid: u32 },
    /// Output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    Exited { code: Option<i32> },
    Failed { error: String },
}

/// Sender half shared by all processes of one executor
pub type EventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// A managed child process
pub struct ManagedProcess {
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<Instant>,
    child: Option<Child>,
    event_tx: Option<EventSender>,
}

impl ManagedProcess {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            started_at: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.id.clone(), event));
        }
    }

    /// Spawn the process
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.id.clone()));
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.config.id,
            self.config.executable.display(),
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                log::error!("[{}] Failed to spawn process: {}", self.config.id, e);
                self.emit(ProcessEvent::Failed {
                    error: e.to_string(),
                });
                return Err(ProcessError::SpawnFailed {
                    id: self.config.id.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;
        self.started_at = Some(Instant::now());
        self.emit(ProcessEvent::Started { pid });

        if let Some(tx) = &self.event_tx {
            if let Some(stdout) = child.stdout.take() {
                forward_lines(self.config.id.clone(), stdout, false, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(self.config.id.clone(), stderr, true, tx.clone());
            }
        }

        self.child = Some(child);
        Ok(())
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after timeout)
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        log::info!("[{}] Stopping process...", self.config.id);

        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGTERM);

        #[cfg(not(unix))]
        {
            let _ = child.kill().await;
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.config.id, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit gracefully, forcing kill",
                    self.config.id
                );
                let _ = child.kill().await;
                None
            }
        };

        log::info!("[{}] Process exited with code: {:?}", self.config.id, code);
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
        Ok(())
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
                log::debug!("[{}] Failed to send {:?}: {}", self.config.id, signal, e);
            }
        }
    }

    /// Poll the child; transitions to `Stopped` when it has exited
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("[{}] Error checking process status: {}", self.config.id, e);
                }
            }
        }

        self.status
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }
}

fn forward_lines<R>(id: String, stream: R, is_stderr: bool, tx: EventSender)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx
                .send((id.clone(), ProcessEvent::Output { line, is_stderr }))
                .is_err()
            {
                break;
            }
        }
    });
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{id}': {source}")]
    SpawnFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },
}
