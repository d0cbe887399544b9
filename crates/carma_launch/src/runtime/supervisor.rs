//! Executor contract and the shutdown-on-exit rule

use crate::plan::{LaunchUnit, OnExit, ResolvedPlan};
use crate::runtime::ExecutorError;
use async_trait::async_trait;

/// Starts and stops launch units.
///
/// Implemented by [`crate::runtime::LocalExecutor`] for real processes and by
/// fakes in tests.
#[async_trait]
pub trait UnitRunner: Send {
    async fn start(&mut self, unit: &LaunchUnit) -> Result<(), ExecutorError>;

    async fn terminate(&mut self, id: &str) -> Result<(), ExecutorError>;
}

/// What the supervisor did about an exited unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    Ignore,
    /// The unit was critical; every other unit has been terminated
    ShutdownPlan,
}

/// Applies a resolved plan to a runner and enforces exit policies
pub struct Supervisor<R> {
    plan: ResolvedPlan,
    runner: R,
    /// Unit ids in start order
    running: Vec<String>,
}

impl<R: UnitRunner> Supervisor<R> {
    pub fn new(plan: ResolvedPlan, runner: R) -> Self {
        Self {
            plan,
            runner,
            running: Vec::new(),
        }
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.plan
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut R {
        &mut self.runner
    }

    /// Ids of units started and not yet exited, in start order
    pub fn running(&self) -> &[String] {
        &self.running
    }

    /// Start every unit in plan order.
    ///
    /// If one fails to start, the units already started are terminated in
    /// reverse order and the start error is returned.
    pub async fn start_all(&mut self) -> Result<(), ExecutorError> {
        log::info!("Launching {} units...", self.plan.units.len());

        let mut failure = None;
        for unit in &self.plan.units {
            match self.runner.start(unit).await {
                Ok(()) => self.running.push(unit.id()),
                Err(e) => {
                    log::error!("[{}] Failed to start: {}", unit.id(), e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            self.shutdown().await;
            return Err(e);
        }

        log::info!("All units launched successfully");
        Ok(())
    }

    /// React to a unit exiting on its own
    pub async fn handle_exit(&mut self, id: &str) -> Result<ExitAction, ExecutorError> {
        let unit = self
            .plan
            .get(id)
            .ok_or_else(|| ExecutorError::UnknownUnit(id.to_string()))?;
        let policy = unit.on_exit();
        self.running.retain(|running| running != id);

        match policy {
            OnExit::Ignore => {
                log::info!("[{}] Exited", id);
                Ok(ExitAction::Ignore)
            }
            OnExit::ShutdownPlan => {
                log::warn!("[{}] Exited, shutting down the whole plan", id);
                self.shutdown().await;
                Ok(ExitAction::ShutdownPlan)
            }
        }
    }

    /// Terminate every running unit in reverse start order
    pub async fn shutdown(&mut self) {
        if self.running.is_empty() {
            return;
        }
        log::info!("Shutting down {} units...", self.running.len());

        while let Some(id) = self.running.pop() {
            if let Err(e) = self.runner.terminate(&id).await {
                log::error!("[{}] Error stopping unit: {}", id, e);
            }
        }

        log::info!("All units shut down");
    }
}
