//! Plan assembly: append-only building, then a one-way finalization

use crate::config::{ResolutionContext, ScopedContext, SubstitutionError};
use crate::plan::{
    CompositionStep, ContainerDescriptor, PlanSource, ProcessDescriptor, RemapEntry,
};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Include nesting limit, guards against include cycles
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Collects composition steps in construction order.
///
/// This is the `Building` state. [`PlanAssembler::assemble`] consumes it and
/// returns the finalized [`Plan`], so there is no way back.
#[derive(Debug, Default)]
pub struct PlanAssembler {
    steps: Vec<CompositionStep>,
}

impl PlanAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn push(&mut self, step: impl Into<CompositionStep>) -> &mut Self {
        self.steps.push(step.into());
        self
    }

    /// Append a step, builder style
    pub fn with_step(mut self, step: impl Into<CompositionStep>) -> Self {
        self.push(step);
        self
    }

    /// Append several steps, preserving their order
    pub fn extend(&mut self, steps: impl IntoIterator<Item = CompositionStep>) -> &mut Self {
        self.steps.extend(steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Finalize the plan.
    ///
    /// Include locations, include arguments and group namespaces are resolved
    /// here because they shape the plan itself. Every other deferred value is
    /// left for the executor. Any failure aborts the whole assembly.
    pub fn assemble(
        self,
        ctx: &dyn ResolutionContext,
        source: &dyn PlanSource,
    ) -> Result<Plan, AssembleError> {
        log::debug!("Assembling plan with {} top-level steps", self.steps.len());
        let plan = finalize(self.steps, ctx, source, &[], 0)?;
        log::debug!("Plan finalized with {} top-level steps", plan.len());
        Ok(plan)
    }
}

/// Finalized, immutable launch plan
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Number of top-level steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of containers and processes, including nested ones
    pub fn unit_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                PlanStep::Container { .. } | PlanStep::Process { .. } => 1,
                PlanStep::SetRemap(_) => 0,
                PlanStep::Include(included) => included.plan.unit_count(),
                PlanStep::Group { plan, .. } => plan.unit_count(),
            })
            .sum()
    }
}

/// A finalized step; mirrors [`CompositionStep`] one to one
#[derive(Debug, Clone)]
pub enum PlanStep {
    Container {
        container: ContainerDescriptor,
        /// Group-level remap defaults in effect, outermost first
        inherited_remaps: Vec<RemapEntry>,
    },
    Process {
        process: ProcessDescriptor,
        inherited_remaps: Vec<RemapEntry>,
    },
    SetRemap(RemapEntry),
    Include(IncludedPlan),
    Group {
        /// Resolved namespace pushed by the group
        namespace: Option<String>,
        plan: Plan,
    },
}

/// An include after its sub-plan was located and loaded
#[derive(Debug, Clone)]
pub struct IncludedPlan {
    pub location: PathBuf,
    /// Configuration values layered over the including context
    pub arguments: IndexMap<String, String>,
    pub plan: Plan,
}

fn finalize(
    steps: Vec<CompositionStep>,
    ctx: &dyn ResolutionContext,
    source: &dyn PlanSource,
    inherited: &[RemapEntry],
    depth: usize,
) -> Result<Plan, AssembleError> {
    let mut scope = inherited.to_vec();
    let mut finalized = Vec::with_capacity(steps.len());

    for step in steps {
        let step = match step {
            CompositionStep::Container(container) => PlanStep::Container {
                container,
                inherited_remaps: scope.clone(),
            },
            CompositionStep::Process(process) => PlanStep::Process {
                process,
                inherited_remaps: scope.clone(),
            },
            CompositionStep::SetRemap(entry) => {
                scope.push(entry.clone());
                PlanStep::SetRemap(entry)
            }
            CompositionStep::Group(group) => {
                let namespace = group
                    .namespace
                    .as_ref()
                    .map(|ns| ns.resolve(ctx))
                    .transpose()
                    .map_err(|e| AssembleError::Substitution {
                        context: "group namespace".to_string(),
                        source: e,
                    })?;

                let child = match &namespace {
                    Some(ns) => ScopedContext::new(ctx).push_namespace(ns),
                    None => ScopedContext::new(ctx),
                };
                let plan = finalize(group.steps, &child, source, &scope, depth)?;
                PlanStep::Group { namespace, plan }
            }
            CompositionStep::Include(include) => {
                let location = include.location.resolve(ctx).map_err(|e| {
                    AssembleError::Substitution {
                        context: format!("include location '{}'", include.location),
                        source: e,
                    }
                })?;

                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(AssembleError::IncludeDepthExceeded {
                        location,
                        depth: MAX_INCLUDE_DEPTH,
                    });
                }

                log::debug!("Including sub-plan '{}'", location);
                let sub_plan = source.load(Path::new(&location)).map_err(|e| {
                    AssembleError::IncludeNotFound {
                        location: location.clone(),
                        reason: e.to_string(),
                    }
                })?;

                // Declared defaults only fill values the includer does not provide
                let mut arguments = IndexMap::new();
                for (name, default) in &sub_plan.arguments {
                    if let Some(default) = default {
                        if ctx.config_value(name).is_none() {
                            arguments.insert(name.clone(), default.clone());
                        }
                    }
                }
                for (name, value) in &include.arguments {
                    let resolved = value.resolve(ctx).map_err(|e| AssembleError::Substitution {
                        context: format!("include '{}' argument '{}'", location, name),
                        source: e,
                    })?;
                    arguments.insert(name.clone(), resolved);
                }

                let child = ScopedContext::new(ctx).with_configs(arguments.clone());
                let plan = finalize(sub_plan.steps, &child, source, &scope, depth + 1)?;

                PlanStep::Include(IncludedPlan {
                    location: PathBuf::from(location),
                    arguments,
                    plan,
                })
            }
        };
        finalized.push(step);
    }

    Ok(Plan { steps: finalized })
}

/// Errors that abort plan assembly
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("Include '{location}' not found: {reason}")]
    IncludeNotFound { location: String, reason: String },

    #[error("Include '{location}' exceeds the maximum include depth of {depth}")]
    IncludeDepthExceeded { location: String, depth: usize },

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },
}
