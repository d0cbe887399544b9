//! Composition steps, groups and includes

use crate::config::SubstitutionList;
use crate::plan::{ContainerDescriptor, ProcessDescriptor, RemapEntry};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One step of a composition, in declaration order
#[derive(Debug, Clone)]
pub enum CompositionStep {
    Container(ContainerDescriptor),
    Process(ProcessDescriptor),
    /// Group-level remap default for the rest of the enclosing scope
    SetRemap(RemapEntry),
    Include(IncludeDescriptor),
    Group(GroupDescriptor),
}

impl CompositionStep {
    /// Short label used in logs and plan listings
    pub fn kind(&self) -> &'static str {
        match self {
            CompositionStep::Container(_) => "container",
            CompositionStep::Process(_) => "process",
            CompositionStep::SetRemap(_) => "set_remap",
            CompositionStep::Include(_) => "include",
            CompositionStep::Group(_) => "group",
        }
    }
}

impl From<ContainerDescriptor> for CompositionStep {
    fn from(container: ContainerDescriptor) -> Self {
        CompositionStep::Container(container)
    }
}

impl From<ProcessDescriptor> for CompositionStep {
    fn from(process: ProcessDescriptor) -> Self {
        CompositionStep::Process(process)
    }
}

impl From<IncludeDescriptor> for CompositionStep {
    fn from(include: IncludeDescriptor) -> Self {
        CompositionStep::Include(include)
    }
}

impl From<GroupDescriptor> for CompositionStep {
    fn from(group: GroupDescriptor) -> Self {
        CompositionStep::Group(group)
    }
}

/// Lexical scope for remap defaults, optionally pushing a namespace
#[derive(Debug, Clone, Default)]
pub struct GroupDescriptor {
    pub namespace: Option<SubstitutionList>,
    pub steps: Vec<CompositionStep>,
}

impl GroupDescriptor {
    pub fn new(steps: Vec<CompositionStep>) -> Self {
        Self {
            namespace: None,
            steps,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<SubstitutionList>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Reference to an externally authored sub-plan
#[derive(Debug, Clone)]
pub struct IncludeDescriptor {
    /// Location of the sub-plan, resolved before handoff
    pub location: SubstitutionList,
    /// Configuration values passed into the sub-plan
    pub arguments: IndexMap<String, SubstitutionList>,
}

impl IncludeDescriptor {
    pub fn new(location: impl Into<SubstitutionList>) -> Self {
        Self {
            location: location.into(),
            arguments: IndexMap::new(),
        }
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<SubstitutionList>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

/// Override steps followed by the include, in that order
pub fn compose(overrides: Vec<RemapEntry>, include: IncludeDescriptor) -> Vec<CompositionStep> {
    overrides
        .into_iter()
        .map(CompositionStep::SetRemap)
        .chain(std::iter::once(CompositionStep::Include(include)))
        .collect()
}

/// [`compose`] wrapped in a group so the overrides stay scoped
pub fn group(overrides: Vec<RemapEntry>, include: IncludeDescriptor) -> CompositionStep {
    CompositionStep::Group(GroupDescriptor::new(compose(overrides, include)))
}

/// A loaded sub-plan
#[derive(Debug, Clone, Default)]
pub struct SubPlan {
    /// Declared configuration values and their defaults
    pub arguments: IndexMap<String, Option<String>>,
    pub steps: Vec<CompositionStep>,
}

/// Loads sub-plans for includes
pub trait PlanSource {
    fn load(&self, location: &Path) -> Result<SubPlan, IncludeError>;
}

/// In-memory sub-plans keyed by location
#[derive(Debug, Clone, Default)]
pub struct StaticPlanSource {
    plans: HashMap<PathBuf, SubPlan>,
}

impl StaticPlanSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, location: impl Into<PathBuf>, plan: SubPlan) -> Self {
        self.plans.insert(location.into(), plan);
        self
    }
}

impl PlanSource for StaticPlanSource {
    fn load(&self, location: &Path) -> Result<SubPlan, IncludeError> {
        self.plans
            .get(location)
            .cloned()
            .ok_or_else(|| IncludeError::NotFound {
                location: location.to_path_buf(),
                reason: "no such sub-plan".to_string(),
            })
    }
}

/// Errors raised while loading a sub-plan
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("Sub-plan '{}' not found: {reason}", location.display())]
    NotFound { location: PathBuf, reason: String },

    #[error("Sub-plan '{}' is invalid: {reason}", location.display())]
    Invalid { location: PathBuf, reason: String },
}
