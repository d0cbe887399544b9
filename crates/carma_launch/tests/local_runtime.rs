//! Local runtime tests
//!
//! Runs resolved plans as real child processes. Package executables are
//! symlinks to `/bin/sh` inside a temporary install prefix, driven by the
//! process arguments.

#![cfg(unix)]

mod common;

use carma_launch::{
    supervise, ExecutorConfig, ExecutorError, ExitAction, LaunchContext, LocalExecutor,
    ProcessStatus, StaticLocator, Supervisor, UnitRunner,
};
use common::{assemble_file, write_plan};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn install_shell(prefix: &Path, package: &str, executable: &str) {
    let dir = prefix.join("lib").join(package);
    std::fs::create_dir_all(&dir).unwrap();
    std::os::unix::fs::symlink("/bin/sh", dir.join(executable)).unwrap();
}

fn executor(prefix: &Path, manifest_dir: &Path) -> LocalExecutor {
    let locator = StaticLocator::new()
        .with_package("j2735_convertor", prefix)
        .with_package("subsystem_controllers", prefix);
    LocalExecutor::new(
        ExecutorConfig {
            shutdown_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            manifest_dir: manifest_dir.to_path_buf(),
        },
        Arc::new(locator),
    )
}

const PLAN: &str = r#"
args:
  controller_script:
    default: "sleep 0.2; exit 1"
steps:
  - process:
      name: j2735_convertor
      package: j2735_convertor
      executable: j2735_convertor_node
      arguments: ["-c", "exec sleep 30"]
  - process:
      name: v2x_controller
      package: subsystem_controllers
      executable: v2x_controller
      on_exit: shutdown_plan
      arguments: ["-c", "$(arg controller_script)"]
"#;

#[tokio::test]
async fn critical_exit_shuts_down_plan() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("install");
    install_shell(&prefix, "j2735_convertor", "j2735_convertor_node");
    install_shell(&prefix, "subsystem_controllers", "v2x_controller");
    let path = write_plan(dir.path(), "v2x.launch.yaml", PLAN);

    let (ctx, plan) = assemble_file(&path, &[], LaunchContext::new().with_namespace("/carma"));
    let resolved = plan.unwrap().resolve(&ctx).unwrap();

    let mut supervisor = Supervisor::new(resolved, executor(&prefix, &dir.path().join("manifests")));
    supervisor.start_all().await.unwrap();
    assert_eq!(supervisor.running().len(), 2);

    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let action = tokio::time::timeout(Duration::from_secs(10), supervise(&mut supervisor, shutdown_rx))
        .await
        .unwrap();

    assert_eq!(action, ExitAction::ShutdownPlan);
    assert!(supervisor.running().is_empty());
    for (id, status) in supervisor.runner().status() {
        assert!(status.is_stopped(), "{} is still {:?}", id, status);
    }
}

#[tokio::test]
async fn shutdown_request_stops_supervision() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("install");
    install_shell(&prefix, "j2735_convertor", "j2735_convertor_node");
    install_shell(&prefix, "subsystem_controllers", "v2x_controller");
    let path = write_plan(dir.path(), "v2x.launch.yaml", PLAN);

    let (ctx, plan) = assemble_file(
        &path,
        &[("controller_script", "exec sleep 30")],
        LaunchContext::new(),
    );
    let resolved = plan.unwrap().resolve(&ctx).unwrap();

    let mut supervisor = Supervisor::new(resolved, executor(&prefix, &dir.path().join("manifests")));
    supervisor.start_all().await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(());
    });

    let action = tokio::time::timeout(Duration::from_secs(10), supervise(&mut supervisor, shutdown_rx))
        .await
        .unwrap();
    assert_eq!(action, ExitAction::Ignore);
    assert_eq!(supervisor.running().len(), 2);

    supervisor.shutdown().await;
    assert!(supervisor
        .runner()
        .status()
        .iter()
        .all(|(_, status)| matches!(status, ProcessStatus::Stopped(_))));
}

#[tokio::test]
async fn start_failure_rolls_back_started_units() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("install");
    // Only the first unit has an executable on disk
    install_shell(&prefix, "j2735_convertor", "j2735_convertor_node");
    let path = write_plan(dir.path(), "v2x.launch.yaml", PLAN);

    let (ctx, plan) = assemble_file(&path, &[], LaunchContext::new());
    let resolved = plan.unwrap().resolve(&ctx).unwrap();

    let mut supervisor = Supervisor::new(resolved, executor(&prefix, &dir.path().join("manifests")));
    assert!(supervisor.start_all().await.is_err());
    assert!(supervisor.running().is_empty());

    let status = supervisor.runner().status();
    assert_eq!(status.len(), 1);
    assert!(status[0].1.is_stopped());
}

#[tokio::test]
async fn running_unit_id_cannot_be_started_twice() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("install");
    install_shell(&prefix, "j2735_convertor", "j2735_convertor_node");
    install_shell(&prefix, "subsystem_controllers", "v2x_controller");
    let path = write_plan(dir.path(), "v2x.launch.yaml", PLAN);

    let (ctx, plan) = assemble_file(
        &path,
        &[("controller_script", "exec sleep 30")],
        LaunchContext::new(),
    );
    let resolved = plan.unwrap().resolve(&ctx).unwrap();
    let unit = &resolved.units[0];

    let mut executor = executor(&prefix, &dir.path().join("manifests"));
    executor.start(unit).await.unwrap();
    assert!(matches!(
        executor.start(unit).await,
        Err(ExecutorError::UnitFailed { ref id, .. }) if id == "/j2735_convertor"
    ));

    // The first process is still tracked and can be stopped
    let status = executor.status();
    assert_eq!(status.len(), 1);
    assert!(status[0].1.is_running());

    executor.terminate("/j2735_convertor").await.unwrap();
    assert!(executor.status()[0].1.is_stopped());
}
