//! Lowering a finalized plan into concrete launch units

use crate::config::{join_namespace, ResolutionContext, ScopedContext, SubstitutionError};
use crate::plan::{
    ContainerDescriptor, ExecutionMode, ModuleDescriptor, OnExit, Plan, PlanStep,
    ProcessDescriptor, RemapEntry, RemapTable, ResolvedRemaps,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// A module with every deferred value resolved
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedModule {
    pub package: String,
    pub plugin: String,
    pub name: String,
    pub namespace: String,
    pub extra_args: IndexMap<String, String>,
    pub remaps: ResolvedRemaps,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedContainer {
    pub package: String,
    pub executable: String,
    pub name: String,
    pub namespace: String,
    pub execution_mode: ExecutionMode,
    pub modules: Vec<ResolvedModule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedProcess {
    pub package: String,
    pub executable: String,
    pub name: String,
    pub namespace: String,
    pub parameters: Vec<String>,
    pub arguments: Vec<String>,
    pub remaps: ResolvedRemaps,
    pub on_exit: OnExit,
}

/// Something a runner starts as one OS process
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchUnit {
    Container(ResolvedContainer),
    Process(ResolvedProcess),
}

impl LaunchUnit {
    /// Fully qualified name, unique within a plan
    pub fn id(&self) -> String {
        join_namespace(self.namespace(), self.name())
    }

    pub fn name(&self) -> &str {
        match self {
            LaunchUnit::Container(c) => &c.name,
            LaunchUnit::Process(p) => &p.name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            LaunchUnit::Container(c) => &c.namespace,
            LaunchUnit::Process(p) => &p.namespace,
        }
    }

    pub fn package(&self) -> &str {
        match self {
            LaunchUnit::Container(c) => &c.package,
            LaunchUnit::Process(p) => &p.package,
        }
    }

    pub fn executable(&self) -> &str {
        match self {
            LaunchUnit::Container(c) => &c.executable,
            LaunchUnit::Process(p) => &p.executable,
        }
    }

    /// Containers never bring the plan down on their own
    pub fn on_exit(&self) -> OnExit {
        match self {
            LaunchUnit::Container(_) => OnExit::Ignore,
            LaunchUnit::Process(p) => p.on_exit,
        }
    }
}

/// Launch units in plan order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedPlan {
    pub units: Vec<LaunchUnit>,
}

impl ResolvedPlan {
    pub fn get(&self, id: &str) -> Option<&LaunchUnit> {
        self.units.iter().find(|unit| unit.id() == id)
    }
}

impl Plan {
    /// Resolve every deferred value against `ctx`.
    ///
    /// Included plans see their include arguments; groups push their
    /// namespace. Fails on the first unresolvable value, or when two units
    /// end up with the same id.
    pub fn resolve(&self, ctx: &dyn ResolutionContext) -> Result<ResolvedPlan, ResolveError> {
        let mut units = Vec::new();
        resolve_steps(self, ctx, &mut units)?;

        let mut seen = HashSet::new();
        for unit in &units {
            let id = unit.id();
            if !seen.insert(id.clone()) {
                return Err(ResolveError::DuplicateUnit(id));
            }
        }

        log::debug!("Resolved plan into {} launch units", units.len());
        Ok(ResolvedPlan { units })
    }
}

fn resolve_steps(
    plan: &Plan,
    ctx: &dyn ResolutionContext,
    units: &mut Vec<LaunchUnit>,
) -> Result<(), ResolveError> {
    for step in plan.steps() {
        match step {
            PlanStep::Container {
                container,
                inherited_remaps,
            } => units.push(LaunchUnit::Container(resolve_container(
                container,
                inherited_remaps,
                ctx,
            )?)),
            PlanStep::Process {
                process,
                inherited_remaps,
            } => units.push(LaunchUnit::Process(resolve_process(
                process,
                inherited_remaps,
                ctx,
            )?)),
            PlanStep::SetRemap(_) => {}
            PlanStep::Include(included) => {
                let child = ScopedContext::new(ctx).with_configs(included.arguments.clone());
                resolve_steps(&included.plan, &child, units)?;
            }
            PlanStep::Group { namespace, plan } => {
                let child = match namespace {
                    Some(ns) => ScopedContext::new(ctx).push_namespace(ns),
                    None => ScopedContext::new(ctx),
                };
                resolve_steps(plan, &child, units)?;
            }
        }
    }
    Ok(())
}

fn resolve_container(
    container: &ContainerDescriptor,
    inherited: &[RemapEntry],
    ctx: &dyn ResolutionContext,
) -> Result<ResolvedContainer, ResolveError> {
    let raw = container
        .namespace
        .resolve(ctx)
        .map_err(|e| ResolveError::at(format!("container '{}' namespace", container.name), e))?;
    let namespace = join_namespace(ctx.namespace(), &raw);

    // Modules see the container namespace as their current namespace
    let module_ctx = ScopedContext::new(ctx).push_namespace(&namespace);
    let modules = container
        .modules
        .iter()
        .map(|module| resolve_module(module, &namespace, inherited, &module_ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResolvedContainer {
        package: container.package.clone(),
        executable: container.executable.clone(),
        name: container.name.clone(),
        namespace,
        execution_mode: container.execution_mode,
        modules,
    })
}

fn resolve_module(
    module: &ModuleDescriptor,
    namespace: &str,
    inherited: &[RemapEntry],
    ctx: &dyn ResolutionContext,
) -> Result<ResolvedModule, ResolveError> {
    let mut extra_args = IndexMap::new();
    for (key, value) in &module.extra_args {
        let resolved = value
            .resolve(ctx)
            .map_err(|e| ResolveError::at(format!("module '{}' extra argument '{}'", module.name, key), e))?;
        extra_args.insert(key.clone(), resolved);
    }

    let remaps = RemapTable::build_scoped(&module.remaps, inherited, ctx)
        .map_err(|e| ResolveError::at(format!("module '{}' remappings", module.name), e))?;

    let parameters = module
        .parameters
        .iter()
        .map(|source| source.resolve(ctx))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ResolveError::at(format!("module '{}' parameters", module.name), e))?;

    Ok(ResolvedModule {
        package: module.package.clone(),
        plugin: module.plugin.clone(),
        name: module.name.clone(),
        namespace: namespace.to_string(),
        extra_args,
        remaps,
        parameters,
    })
}

fn resolve_process(
    process: &ProcessDescriptor,
    inherited: &[RemapEntry],
    ctx: &dyn ResolutionContext,
) -> Result<ResolvedProcess, ResolveError> {
    let parameters = process
        .parameters
        .iter()
        .map(|source| source.resolve(ctx))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ResolveError::at(format!("process '{}' parameters", process.name), e))?;

    let arguments = process
        .arguments
        .iter()
        .map(|argument| argument.resolve(ctx))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ResolveError::at(format!("process '{}' arguments", process.name), e))?;

    let remaps = RemapTable::build(inherited, ctx)
        .map_err(|e| ResolveError::at(format!("process '{}' remappings", process.name), e))?;

    Ok(ResolvedProcess {
        package: process.package.clone(),
        executable: process.executable.clone(),
        name: process.name.clone(),
        namespace: ctx.namespace().to_string(),
        parameters,
        arguments,
        remaps,
        on_exit: process.on_exit,
    })
}

/// Errors raised while resolving a plan
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Duplicate launch unit '{0}': give repeated includes their own namespace")]
    DuplicateUnit(String),
}

impl ResolveError {
    fn at(context: String, source: SubstitutionError) -> Self {
        ResolveError::Substitution { context, source }
    }
}

/// Display the resolved plan in a human-readable format
impl fmt::Display for ResolvedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "Units (in launch order):")?;

        for (i, unit) in self.units.iter().enumerate() {
            writeln!(f)?;
            match unit {
                LaunchUnit::Container(container) => {
                    writeln!(
                        f,
                        "  {}. {} [container, {}]",
                        i + 1,
                        unit.id(),
                        container.execution_mode.as_str()
                    )?;
                    writeln!(f, "     Executable: {}/{}", container.package, container.executable)?;
                    for module in &container.modules {
                        writeln!(f, "     Module: {} ({})", module.name, module.plugin)?;
                        for (key, value) in &module.extra_args {
                            writeln!(f, "       Arg: {}={}", key, value)?;
                        }
                        for (from, to) in &module.remaps {
                            writeln!(f, "       Remap: {} -> {}", from, to)?;
                        }
                        for param in &module.parameters {
                            writeln!(f, "       Params: {}", param)?;
                        }
                    }
                }
                LaunchUnit::Process(process) => {
                    let policy = match process.on_exit {
                        OnExit::Ignore => "",
                        OnExit::ShutdownPlan => ", shutdown plan on exit",
                    };
                    writeln!(f, "  {}. {} [process{}]", i + 1, unit.id(), policy)?;
                    writeln!(
                        f,
                        "     Command: {}/{} {}",
                        process.package,
                        process.executable,
                        process.arguments.join(" ")
                    )?;
                    for (from, to) in &process.remaps {
                        writeln!(f, "     Remap: {} -> {}", from, to)?;
                    }
                    for param in &process.parameters {
                        writeln!(f, "     Params: {}", param)?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Derived, LaunchContext, Substitution, SubstitutionList};
    use crate::plan::{
        CompositionStep, GroupDescriptor, IncludeDescriptor, PlanAssembler, StaticPlanSource,
        SubPlan,
    };

    fn mobilitypath() -> ModuleDescriptor {
        ModuleDescriptor::new(
            "mobilitypath_publisher",
            "mobilitypath_publisher::MobilityPathPublication",
            "mobilitypath_publisher_node",
        )
        .extra_arg("use_intra_process_comms", true)
        .extra_arg("--log-level", Derived::env_log_level("mobilitypath_publisher"))
        .remap(
            "plan_trajectory",
            vec![
                Substitution::env_or("CARMA_GUIDE_NS", ""),
                Substitution::text("/plan_trajectory"),
            ],
        )
        .parameter(Substitution::config("vehicle_characteristics_path"))
    }

    fn assemble(steps: Vec<CompositionStep>, ctx: &LaunchContext) -> Plan {
        let mut assembler = PlanAssembler::new();
        assembler.extend(steps);
        assembler.assemble(ctx, &StaticPlanSource::new()).unwrap()
    }

    #[test]
    fn test_container_namespace_applies_to_modules() {
        let ctx = LaunchContext::new()
            .with_namespace("/carma")
            .with_env("CARMA_GUIDE_NS", "/guidance")
            .with_config("vehicle_characteristics_path", "/opt/vehicle.yaml");
        let container = ContainerDescriptor::new("carma_ros2_utils", "container_mt", "carma_v2x_container")
            .execution_mode(ExecutionMode::MultiThreaded)
            .module(mobilitypath())
            .module(ModuleDescriptor::new("other", "other::Other", "other_node"));

        let plan = assemble(vec![container.into()], &ctx);
        let resolved = plan.resolve(&ctx).unwrap();

        let LaunchUnit::Container(c) = &resolved.units[0] else {
            panic!("expected container");
        };
        assert_eq!(c.namespace, "/carma");
        assert!(c.modules.iter().all(|m| m.namespace == "/carma"));
        assert_eq!(c.modules[0].remaps["plan_trajectory"], "/guidance/plan_trajectory");
        assert_eq!(c.modules[0].extra_args["use_intra_process_comms"], "true");
        assert_eq!(c.modules[0].extra_args["--log-level"], "WARN");
        assert_eq!(c.modules[0].parameters, vec!["/opt/vehicle.yaml".to_string()]);
        assert_eq!(resolved.units[0].id(), "/carma/carma_v2x_container");
    }

    #[test]
    fn test_relative_container_namespace() {
        let ctx = LaunchContext::new().with_namespace("/carma");
        let container = ContainerDescriptor::new("p", "e", "c").namespace("message");
        let resolved = assemble(vec![container.into()], &ctx).resolve(&ctx).unwrap();
        assert_eq!(resolved.units[0].namespace(), "/carma/message");
    }

    #[test]
    fn test_group_level_remap_reaches_included_modules() {
        let ctx = LaunchContext::new();
        let sub_plan = SubPlan {
            arguments: IndexMap::new(),
            steps: vec![CompositionStep::Container(
                ContainerDescriptor::new("p", "e", "convertor_container")
                    .module(ModuleDescriptor::new("j2735_convertor", "j2735::Node", "a"))
                    .module(
                        ModuleDescriptor::new("j2735_convertor", "j2735::Node", "b")
                            .remap("outgoing_bsm", "/b/local"),
                    ),
            )],
        };
        let source = StaticPlanSource::new().with_plan("sub", sub_plan);
        let plan = PlanAssembler::new()
            .with_step(crate::plan::group(
                vec![RemapEntry::new("outgoing_bsm", "bsm_outbound")],
                IncludeDescriptor::new("sub"),
            ))
            .assemble(&ctx, &source)
            .unwrap();

        let resolved = plan.resolve(&ctx).unwrap();
        let LaunchUnit::Container(c) = &resolved.units[0] else {
            panic!("expected container");
        };
        assert_eq!(c.modules[0].remaps["outgoing_bsm"], "bsm_outbound");
        // The included module's own entry wins
        assert_eq!(c.modules[1].remaps["outgoing_bsm"], "/b/local");
    }

    #[test]
    fn test_include_arguments_visible_in_sub_plan() {
        let ctx = LaunchContext::new();
        let sub_plan = SubPlan {
            arguments: IndexMap::new(),
            steps: vec![CompositionStep::Process(
                ProcessDescriptor::new("p", "e", "node").argument(Substitution::config("rate")),
            )],
        };
        let plan = PlanAssembler::new()
            .with_step(IncludeDescriptor::new("sub").argument("rate", "20"))
            .assemble(&ctx, &StaticPlanSource::new().with_plan("sub", sub_plan))
            .unwrap();

        let resolved = plan.resolve(&ctx).unwrap();
        let LaunchUnit::Process(p) = &resolved.units[0] else {
            panic!("expected process");
        };
        assert_eq!(p.arguments, vec!["20".to_string()]);
    }

    #[test]
    fn test_group_namespace_pushes() {
        let ctx = LaunchContext::new();
        let group = GroupDescriptor::new(vec![
            ProcessDescriptor::new("p", "e", "node").into(),
        ])
        .namespace("v2x");
        let resolved = assemble(vec![group.into()], &ctx).resolve(&ctx).unwrap();
        assert_eq!(resolved.units[0].id(), "/v2x/node");
    }

    #[test]
    fn test_unresolved_config_fails_resolution() {
        let ctx = LaunchContext::new();
        let process = ProcessDescriptor::new("p", "e", "node")
            .parameter(SubstitutionList::from(Substitution::config("missing")));
        let result = assemble(vec![process.into()], &ctx).resolve(&ctx);
        assert!(matches!(
            result,
            Err(ResolveError::Substitution {
                source: SubstitutionError::UnresolvedConfig(_),
                ..
            })
        ));
    }

    #[test]
    fn test_repeated_include_needs_distinct_namespaces() {
        let ctx = LaunchContext::new();
        let sub_plan = SubPlan {
            arguments: IndexMap::new(),
            steps: vec![ProcessDescriptor::new("j2735_convertor", "node", "j2735_convertor").into()],
        };
        let source = StaticPlanSource::new().with_plan("sub", sub_plan);

        let clashing = PlanAssembler::new()
            .with_step(IncludeDescriptor::new("sub"))
            .with_step(IncludeDescriptor::new("sub"))
            .assemble(&ctx, &source)
            .unwrap();
        assert!(matches!(
            clashing.resolve(&ctx),
            Err(ResolveError::DuplicateUnit(ref id)) if id == "/j2735_convertor"
        ));

        let scoped = PlanAssembler::new()
            .with_step(GroupDescriptor::new(vec![IncludeDescriptor::new("sub").into()]).namespace("a"))
            .with_step(GroupDescriptor::new(vec![IncludeDescriptor::new("sub").into()]).namespace("b"))
            .assemble(&ctx, &source)
            .unwrap();
        let ids: Vec<_> = scoped.resolve(&ctx).unwrap().units.iter().map(LaunchUnit::id).collect();
        assert_eq!(ids, vec!["/a/j2735_convertor", "/b/j2735_convertor"]);
    }

    #[test]
    fn test_display_lists_units() {
        let ctx = LaunchContext::new();
        let process = ProcessDescriptor::new("subsystem_controllers", "v2x_controller", "v2x_controller")
            .on_exit(OnExit::ShutdownPlan)
            .argument("--ros-args");
        let rendered = assemble(vec![process.into()], &ctx)
            .resolve(&ctx)
            .unwrap()
            .to_string();
        assert!(rendered.contains("1. /v2x_controller [process, shutdown plan on exit]"));
        assert!(rendered.contains("Command: subsystem_controllers/v2x_controller --ros-args"));
    }
}
