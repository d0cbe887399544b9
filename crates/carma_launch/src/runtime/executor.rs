//! Local executor - runs launch units as child processes

use crate::config::{PackageLocator, SubstitutionError};
use crate::plan::{LaunchUnit, ResolvedContainer, ResolvedRemaps};
use crate::runtime::process::{
    ManagedProcess, ProcessConfig, ProcessError, ProcessEvent, ProcessStatus,
};
use crate::runtime::supervisor::{ExitAction, Supervisor, UnitRunner};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Flag that hands a container its module list
pub const COMPOSITION_MANIFEST_FLAG: &str = "--composition-manifest";

/// Local executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_timeout: Duration,
    /// How often running units are checked for exits
    pub poll_interval: Duration,
    /// Where container composition manifests are written
    pub manifest_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            manifest_dir: std::env::temp_dir().join("carma_launch"),
        }
    }
}

/// Runs launch units as local OS processes
pub struct LocalExecutor {
    config: ExecutorConfig,
    locator: Arc<dyn PackageLocator>,
    processes: IndexMap<String, ManagedProcess>,
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

impl LocalExecutor {
    pub fn new(config: ExecutorConfig, locator: Arc<dyn PackageLocator>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            locator,
            processes: IndexMap::new(),
            event_tx,
            event_rx,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Lower a unit into a command line.
    ///
    /// Containers get their modules through a JSON manifest written to
    /// `manifest_dir`.
    pub fn command(&self, unit: &LaunchUnit) -> Result<ProcessConfig, ExecutorError> {
        let id = unit.id();
        let executable = self
            .locator
            .executable(unit.package(), unit.executable())
            .map_err(|source| ExecutorError::ExecutableNotFound {
                id: id.clone(),
                source,
            })?;

        let args = match unit {
            LaunchUnit::Container(container) => {
                let manifest = self.write_manifest(&id, container)?;
                let mut args = vec![
                    COMPOSITION_MANIFEST_FLAG.to_string(),
                    manifest.to_string_lossy().into_owned(),
                ];
                args.extend(ros_arguments(
                    &container.name,
                    &container.namespace,
                    &[],
                    &ResolvedRemaps::new(),
                ));
                args
            }
            LaunchUnit::Process(process) => {
                let mut args = process.arguments.clone();
                args.extend(ros_arguments(
                    &process.name,
                    &process.namespace,
                    &process.parameters,
                    &process.remaps,
                ));
                args
            }
        };

        Ok(ProcessConfig {
            id,
            executable,
            args,
            env: HashMap::new(),
        })
    }

    fn write_manifest(
        &self,
        id: &str,
        container: &ResolvedContainer,
    ) -> Result<PathBuf, ExecutorError> {
        let failed = |reason: String| ExecutorError::UnitFailed {
            id: id.to_string(),
            reason,
        };

        std::fs::create_dir_all(&self.config.manifest_dir).map_err(|e| {
            failed(format!(
                "cannot create manifest directory '{}': {}",
                self.config.manifest_dir.display(),
                e
            ))
        })?;

        let path = self.config.manifest_dir.join(manifest_file_name(id));
        let content = serde_json::to_string_pretty(container)
            .map_err(|e| failed(format!("cannot serialize composition manifest: {}", e)))?;
        std::fs::write(&path, content).map_err(|e| {
            failed(format!(
                "cannot write composition manifest '{}': {}",
                path.display(),
                e
            ))
        })?;

        log::debug!(
            "[{}] Wrote composition manifest with {} modules to {}",
            id,
            container.modules.len(),
            path.display()
        );
        Ok(path)
    }

    /// Ids of units that exited since the last poll
    pub fn poll_exits(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        for (id, process) in self.processes.iter_mut() {
            if process.status.is_running() && process.check_status().is_stopped() {
                if let Some(uptime) = process.uptime() {
                    log::info!("[{}] Exited after {:.1}s", id, uptime.as_secs_f64());
                }
                exited.push(id.clone());
            }
        }
        exited
    }

    /// Next output or lifecycle event from any unit
    pub async fn next_event(&mut self) -> Option<(String, ProcessEvent)> {
        self.event_rx.recv().await
    }

    /// Status of every unit started so far
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|(id, process)| (id.as_str(), process.status))
            .collect()
    }
}

#[async_trait]
impl UnitRunner for LocalExecutor {
    async fn start(&mut self, unit: &LaunchUnit) -> Result<(), ExecutorError> {
        let id = unit.id();
        if self
            .processes
            .get(&id)
            .is_some_and(|process| process.status.is_running())
        {
            return Err(ExecutorError::UnitFailed {
                id,
                reason: "a unit with this id is already running".to_string(),
            });
        }

        let config = self.command(unit)?;

        let mut process = ManagedProcess::new(config).with_event_sender(self.event_tx.clone());
        process.start().await?;
        self.processes.insert(id, process);
        Ok(())
    }

    async fn terminate(&mut self, id: &str) -> Result<(), ExecutorError> {
        let timeout = self.config.shutdown_timeout;
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| ExecutorError::UnknownUnit(id.to_string()))?;

        if process.status.is_running() {
            process.stop(timeout).await?;
        }
        Ok(())
    }
}

/// ROS command line tail shared by containers and processes
pub fn ros_arguments(
    name: &str,
    namespace: &str,
    parameters: &[String],
    remaps: &ResolvedRemaps,
) -> Vec<String> {
    let mut args = vec![
        "--ros-args".to_string(),
        "-r".to_string(),
        format!("__node:={}", name),
        "-r".to_string(),
        format!("__ns:={}", namespace),
    ];
    for file in parameters {
        args.push("--params-file".to_string());
        args.push(file.clone());
    }
    for (from, to) in remaps {
        args.push("-r".to_string());
        args.push(format!("{}:={}", from, to));
    }
    args
}

fn manifest_file_name(id: &str) -> String {
    format!("{}.json", id.trim_start_matches('/').replace('/', "__"))
}

fn log_event(id: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            if is_stderr {
                log::warn!("[{}] {}", id, line);
            } else {
                log::info!("[{}] {}", id, line);
            }
        }
        ProcessEvent::Exited { code } => {
            log::info!("[{}] Process exited with code: {:?}", id, code);
        }
        ProcessEvent::Failed { error } => {
            log::error!("[{}] Process failed: {}", id, error);
        }
        ProcessEvent::Started { pid } => {
            log::info!("[{}] Process started with PID: {}", id, pid);
        }
    }
}

/// Forward unit output and apply exit policies until shutdown.
///
/// Returns `ExitAction::ShutdownPlan` when a critical unit exited (the rest
/// of the plan is already terminated), `ExitAction::Ignore` when a shutdown
/// was requested or every unit stopped on its own.
pub async fn supervise(
    supervisor: &mut Supervisor<LocalExecutor>,
    mut shutdown_rx: watch::Receiver<()>,
) -> ExitAction {
    let mut ticker = tokio::time::interval(supervisor.runner().config().poll_interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                log::info!("Shutdown signal received");
                return ExitAction::Ignore;
            }

            event = supervisor.runner_mut().next_event() => {
                if let Some((id, event)) = event {
                    log_event(&id, event);
                }
            }

            _ = ticker.tick() => {
                let exited = supervisor.runner_mut().poll_exits();
                for id in exited {
                    match supervisor.handle_exit(&id).await {
                        Ok(ExitAction::ShutdownPlan) => return ExitAction::ShutdownPlan,
                        Ok(ExitAction::Ignore) => {}
                        Err(e) => log::error!("[{}] {}", id, e),
                    }
                }
                if supervisor.running().is_empty() {
                    log::info!("All units have stopped");
                    return ExitAction::Ignore;
                }
            }
        }
    }
}

/// Errors that can occur while running a plan
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Cannot locate executable for unit '{id}': {source}")]
    ExecutableNotFound {
        id: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Unit '{id}' failed: {reason}")]
    UnitFailed { id: String, reason: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),
}
