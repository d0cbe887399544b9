//! CARMA launch CLI
//!
//! Usage:
//!   carma_launch launch/v2x.launch.yaml
//!   carma_launch launch/v2x.launch.yaml -a vehicle_config_dir:=/opt/carma/vehicle/config
//!   carma_launch launch/v2x.launch.yaml --namespace /carma/message --dry-run

use carma_launch::{
    AmentIndexLocator, ExecutorConfig, ExitAction, LaunchArgs, LaunchContext, LaunchFile,
    LayeredLocator, LocalExecutor, PlanAssembler, StaticLocator, Supervisor, YamlPlanSource,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // Load plan file
    log::info!("Loading plan file: {}", args.plan_file);
    let launch_file = match LaunchFile::from_file(&args.plan_file) {
        Ok(lf) => lf,
        Err(e) => {
            log::error!("Failed to load plan file: {}", e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!("Plan file '{}' is valid", args.plan_file);
        println!("  Version: {}", launch_file.version);
        println!("  Args: {}", launch_file.args.len());
        println!("  Steps: {}", launch_file.step_count());
        return;
    }

    let configs = match launch_file.bind_arguments(&args.arg_overrides()) {
        Ok(configs) => configs,
        Err(e) => {
            log::error!("Invalid plan arguments: {}", e);
            std::process::exit(1);
        }
    };

    let overrides = args
        .prefix
        .iter()
        .fold(StaticLocator::new(), |locator, (package, path)| {
            locator.with_package(package.clone(), path.clone())
        });
    let ctx = LaunchContext::from_process_env()
        .with_locator(LayeredLocator::new(
            overrides,
            Arc::new(AmentIndexLocator::from_env()),
        ))
        .with_namespace(&args.namespace)
        .with_configs(configs)
        .with_strict(args.strict);

    // Compose and resolve
    let steps = match launch_file.into_steps() {
        Ok(steps) => steps,
        Err(e) => {
            log::error!("Failed to build plan: {}", e);
            std::process::exit(1);
        }
    };
    let mut assembler = PlanAssembler::new();
    assembler.extend(steps);

    let plan = match assembler.assemble(&ctx, &YamlPlanSource::new()) {
        Ok(plan) => plan,
        Err(e) => {
            log::error!("Failed to assemble plan: {}", e);
            std::process::exit(1);
        }
    };
    let resolved = match plan.resolve(&ctx) {
        Ok(resolved) => resolved,
        Err(e) => {
            log::error!("Failed to resolve plan: {}", e);
            std::process::exit(1);
        }
    };

    // Dry run mode
    if args.dry_run {
        if args.json {
            match serde_json::to_string_pretty(&resolved) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    log::error!("Failed to serialize plan: {}", e);
                    std::process::exit(1);
                }
            }
        } else {
            println!("{}", resolved);
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    let executor = LocalExecutor::new(ExecutorConfig::default(), ctx.shared_locator());
    let mut supervisor = Supervisor::new(resolved, executor);

    // Launch all units
    if let Err(e) = supervisor.start_all().await {
        log::error!("Launch failed: {}", e);
        std::process::exit(1);
    }

    // Wait for shutdown signal, a critical exit or all units to stop
    if carma_launch::supervise(&mut supervisor, shutdown_rx).await == ExitAction::ShutdownPlan {
        log::warn!("A critical unit exited, plan shut down");
    }

    supervisor.shutdown().await;

    log::info!("carma_launch exiting");
}
