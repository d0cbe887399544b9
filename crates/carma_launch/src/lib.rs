//! CARMA Launch Composition
//!
//! A deferred-substitution launch model for CARMA subsystems.
//!
//! # Overview
//!
//! A launch plan is composed from declarative steps:
//! - Containers hosting composable modules, and standalone processes
//! - Scoped topic remappings that reach later siblings and nested includes
//! - Includes of sub-plans with their own arguments
//! - Namespace groups
//!
//! Values such as environment lookups, launch arguments, package share
//! directories and log levels are kept as substitutions until the plan is
//! resolved against a context, so one plan can be launched in many
//! environments.
//!
//! # Example Plan File
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   vehicle_characteristics_path:
//!     default: "/opt/carma/vehicle/config/VehicleCharacteristics.yaml"
//!
//! steps:
//!   - container:
//!       name: carma_v2x_container
//!       package: carma_ros2_utils
//!       executable: carma_component_container_mt
//!       mode: multi_threaded
//!       modules:
//!         - package: mobilitypath_publisher
//!           plugin: mobilitypath_publisher::MobilityPathPublication
//!           name: mobilitypath_publisher_node
//!           extra_arguments:
//!             "--log-level": "$(log-level mobilitypath_publisher)"
//!           remappings:
//!             - from: plan_trajectory
//!               to: "$(env CARMA_GUIDE_NS '')/plan_trajectory"
//!           parameters:
//!             - "$(arg vehicle_characteristics_path)"
//!
//!   - process:
//!       name: v2x_controller
//!       package: subsystem_controllers
//!       executable: v2x_controller
//!       on_exit: shutdown_plan
//! ```

pub mod cli;
pub mod config;
pub mod plan;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{
    AmentIndexLocator, Derived, LaunchContext, LaunchFile, LaunchFileError, LayeredLocator,
    PackageLocator, ResolutionContext, ScopedContext, StaticLocator, Substitution,
    SubstitutionError, SubstitutionList, YamlPlanSource,
};
pub use plan::{
    compose, group, AssembleError, CompositionStep, ContainerDescriptor, IncludeDescriptor,
    LaunchUnit, ModuleDescriptor, OnExit, Plan, PlanAssembler, PlanSource, ProcessDescriptor,
    RemapEntry, RemapTable, ResolveError, ResolvedPlan, StaticPlanSource,
};
pub use runtime::{
    supervise, ExecutorConfig, ExecutorError, ExitAction, LocalExecutor, ManagedProcess,
    ProcessConfig, ProcessError, ProcessEvent, ProcessStatus, Supervisor, UnitRunner,
};
