//! Module, container and supervisory process descriptors
//!
//! Descriptors are plain data. Building one never fails; every deferred value
//! is checked when the plan is resolved.

use crate::config::{ArgValue, ResolutionContext, SubstitutionError, SubstitutionList};
use crate::plan::RemapEntry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Extra runtime argument value
#[derive(Debug, Clone)]
pub enum ExtraArg {
    Literal(ArgValue),
    Deferred(SubstitutionList),
}

impl ExtraArg {
    pub fn resolve(&self, ctx: &dyn ResolutionContext) -> Result<String, SubstitutionError> {
        match self {
            ExtraArg::Literal(value) => Ok(value.as_str()),
            ExtraArg::Deferred(list) => list.resolve(ctx),
        }
    }
}

impl From<bool> for ExtraArg {
    fn from(value: bool) -> Self {
        ExtraArg::Literal(ArgValue::Bool(value))
    }
}

impl From<i64> for ExtraArg {
    fn from(value: i64) -> Self {
        ExtraArg::Literal(ArgValue::Int(value))
    }
}

impl From<SubstitutionList> for ExtraArg {
    fn from(list: SubstitutionList) -> Self {
        ExtraArg::Deferred(list)
    }
}

impl From<crate::config::Derived> for ExtraArg {
    fn from(derived: crate::config::Derived) -> Self {
        ExtraArg::Deferred(derived.into())
    }
}

impl From<&str> for ExtraArg {
    fn from(value: &str) -> Self {
        ExtraArg::Literal(ArgValue::String(value.to_string()))
    }
}

/// Where a parameter file comes from
#[derive(Debug, Clone)]
pub enum ParameterSource {
    /// Path known at construction time
    File(PathBuf),
    /// Path computed at resolution time
    Deferred(SubstitutionList),
}

impl ParameterSource {
    pub fn resolve(&self, ctx: &dyn ResolutionContext) -> Result<String, SubstitutionError> {
        match self {
            ParameterSource::File(path) => Ok(path.to_string_lossy().into_owned()),
            ParameterSource::Deferred(list) => list.resolve(ctx),
        }
    }
}

impl From<PathBuf> for ParameterSource {
    fn from(path: PathBuf) -> Self {
        ParameterSource::File(path)
    }
}

impl From<SubstitutionList> for ParameterSource {
    fn from(list: SubstitutionList) -> Self {
        ParameterSource::Deferred(list)
    }
}

impl From<crate::config::Substitution> for ParameterSource {
    fn from(part: crate::config::Substitution) -> Self {
        ParameterSource::Deferred(part.into())
    }
}

/// A composable unit loaded into a container
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Package providing the plugin
    pub package: String,
    /// Implementation reference, e.g. `mobilitypath_publisher::MobilityPathPublication`
    pub plugin: String,
    /// Instance name
    pub name: String,
    pub extra_args: IndexMap<String, ExtraArg>,
    pub remaps: Vec<RemapEntry>,
    pub parameters: Vec<ParameterSource>,
}

impl ModuleDescriptor {
    pub fn new(
        package: impl Into<String>,
        plugin: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            plugin: plugin.into(),
            name: name.into(),
            extra_args: IndexMap::new(),
            remaps: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn extra_arg(mut self, key: impl Into<String>, value: impl Into<ExtraArg>) -> Self {
        self.extra_args.insert(key.into(), value.into());
        self
    }

    pub fn remap(mut self, from: impl Into<String>, to: impl Into<SubstitutionList>) -> Self {
        self.remaps.push(RemapEntry::new(from, to));
        self
    }

    pub fn parameter(mut self, source: impl Into<ParameterSource>) -> Self {
        self.parameters.push(source.into());
        self
    }
}

/// Threading model of a component container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    SingleThreaded,
    MultiThreaded,
    /// One executor per module
    Isolated,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::SingleThreaded => "single_threaded",
            ExecutionMode::MultiThreaded => "multi_threaded",
            ExecutionMode::Isolated => "isolated",
        }
    }
}

/// A supervisory process hosting modules under one namespace
#[derive(Debug, Clone)]
pub struct ContainerDescriptor {
    pub package: String,
    pub executable: String,
    pub name: String,
    /// Resolved once and applied to every module
    pub namespace: SubstitutionList,
    pub execution_mode: ExecutionMode,
    pub modules: Vec<ModuleDescriptor>,
}

impl ContainerDescriptor {
    /// Create a container in the namespace of the surrounding context
    pub fn new(
        package: impl Into<String>,
        executable: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            executable: executable.into(),
            name: name.into(),
            namespace: crate::config::Derived::current_namespace().into(),
            execution_mode: ExecutionMode::default(),
            modules: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<SubstitutionList>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn module(mut self, module: ModuleDescriptor) -> Self {
        self.modules.push(module);
        self
    }
}

/// What the executor does when a process exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExit {
    #[default]
    Ignore,
    /// Terminate every other unit of the plan
    #[serde(alias = "shutdown")]
    ShutdownPlan,
}

/// A standalone process with its own lifecycle policy
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub package: String,
    pub executable: String,
    pub name: String,
    pub parameters: Vec<ParameterSource>,
    pub arguments: Vec<SubstitutionList>,
    pub on_exit: OnExit,
}

impl ProcessDescriptor {
    pub fn new(
        package: impl Into<String>,
        executable: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            executable: executable.into(),
            name: name.into(),
            parameters: Vec::new(),
            arguments: Vec::new(),
            on_exit: OnExit::Ignore,
        }
    }

    pub fn parameter(mut self, source: impl Into<ParameterSource>) -> Self {
        self.parameters.push(source.into());
        self
    }

    pub fn argument(mut self, argument: impl Into<SubstitutionList>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn on_exit(mut self, policy: OnExit) -> Self {
        self.on_exit = policy;
        self
    }
}
