//! Plan file YAML schema definitions

use crate::config::{SubstitutionError, SubstitutionList};
use crate::plan::{
    CompositionStep, ContainerDescriptor, ExecutionMode, ExtraArg, GroupDescriptor,
    IncludeDescriptor, IncludeError, ModuleDescriptor, OnExit, ParameterSource, PlanSource,
    ProcessDescriptor, RemapEntry, SubPlan,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Root plan file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchFile {
    /// Plan file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument definitions with defaults
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Composition steps in declaration order
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument definition, optionally with a default value
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgDefinition {
    /// Default value for the argument
    #[serde(default)]
    pub default: Option<ArgValue>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// One step; exactly one field must be set
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub process: Option<ProcessSpec>,
    #[serde(default)]
    pub set_remap: Option<RemapSpec>,
    #[serde(default)]
    pub include: Option<IncludeSpec>,
    #[serde(default)]
    pub group: Option<GroupSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    pub name: String,
    pub package: String,
    pub executable: String,
    /// Defaults to the namespace of the enclosing scope
    #[serde(default)]
    pub namespace: Option<SubstitutionList>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSpec {
    pub package: String,
    pub plugin: String,
    pub name: String,
    #[serde(default)]
    pub extra_arguments: IndexMap<String, ExtraArgSpec>,
    #[serde(default)]
    pub remappings: Vec<RemapSpec>,
    #[serde(default)]
    pub parameters: Vec<SubstitutionList>,
}

/// Extra argument as written in YAML; strings are templates
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExtraArgSpec {
    Bool(bool),
    Int(i64),
    Float(f64),
    Template(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub name: String,
    pub package: String,
    pub executable: String,
    #[serde(default)]
    pub parameters: Vec<SubstitutionList>,
    #[serde(default)]
    pub arguments: Vec<SubstitutionList>,
    #[serde(default)]
    pub on_exit: OnExit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemapSpec {
    pub from: String,
    pub to: SubstitutionList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeSpec {
    pub path: SubstitutionList,
    #[serde(default)]
    pub arguments: IndexMap<String, SubstitutionList>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    #[serde(default)]
    pub namespace: Option<SubstitutionList>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl StepSpec {
    fn kinds(&self) -> Vec<&'static str> {
        [
            self.container.as_ref().map(|_| "container"),
            self.process.as_ref().map(|_| "process"),
            self.set_remap.as_ref().map(|_| "set_remap"),
            self.include.as_ref().map(|_| "include"),
            self.group.as_ref().map(|_| "group"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn into_step(self) -> Result<CompositionStep, LaunchFileError> {
        let StepSpec {
            container,
            process,
            set_remap,
            include,
            group,
        } = self;

        if let Some(container) = container {
            return container.into_descriptor().map(CompositionStep::Container);
        }
        if let Some(process) = process {
            return Ok(CompositionStep::Process(process.into_descriptor()));
        }
        if let Some(remap) = set_remap {
            return Ok(CompositionStep::SetRemap(RemapEntry::new(remap.from, remap.to)));
        }
        if let Some(include) = include {
            let mut descriptor = IncludeDescriptor::new(include.path);
            descriptor.arguments = include.arguments;
            return Ok(CompositionStep::Include(descriptor));
        }
        if let Some(group) = group {
            let steps = group
                .steps
                .into_iter()
                .map(StepSpec::into_step)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(CompositionStep::Group(GroupDescriptor {
                namespace: group.namespace,
                steps,
            }));
        }

        Err(LaunchFileError::Validation("empty step".to_string()))
    }
}

impl ContainerSpec {
    fn into_descriptor(self) -> Result<ContainerDescriptor, LaunchFileError> {
        let mut container = ContainerDescriptor::new(self.package, self.executable, self.name)
            .execution_mode(self.mode);
        if let Some(namespace) = self.namespace {
            container = container.namespace(namespace);
        }
        for module in self.modules {
            container = container.module(module.into_descriptor()?);
        }
        Ok(container)
    }
}

impl ModuleSpec {
    fn into_descriptor(self) -> Result<ModuleDescriptor, LaunchFileError> {
        let mut module = ModuleDescriptor::new(self.package, self.plugin, self.name);
        for (key, value) in self.extra_arguments {
            let arg = match value {
                ExtraArgSpec::Bool(b) => ExtraArg::Literal(ArgValue::Bool(b)),
                ExtraArgSpec::Int(i) => ExtraArg::Literal(ArgValue::Int(i)),
                ExtraArgSpec::Float(f) => ExtraArg::Literal(ArgValue::Float(f)),
                ExtraArgSpec::Template(template) => ExtraArg::Deferred(
                    SubstitutionList::parse(&template).map_err(|e| LaunchFileError::Template {
                        context: format!("module '{}' extra argument '{}'", module.name, key),
                        source: e,
                    })?,
                ),
            };
            module.extra_args.insert(key, arg);
        }
        for remap in self.remappings {
            module = module.remap(remap.from, remap.to);
        }
        for parameter in self.parameters {
            module = module.parameter(parameter_source(parameter));
        }
        Ok(module)
    }
}

impl ProcessSpec {
    fn into_descriptor(self) -> ProcessDescriptor {
        let mut process = ProcessDescriptor::new(self.package, self.executable, self.name)
            .on_exit(self.on_exit);
        for parameter in self.parameters {
            process = process.parameter(parameter_source(parameter));
        }
        for argument in self.arguments {
            process = process.argument(argument);
        }
        process
    }
}

/// Literal paths become file sources, anything templated stays deferred
fn parameter_source(list: SubstitutionList) -> ParameterSource {
    let mut literal = String::new();
    for part in list.parts() {
        match part {
            crate::config::Substitution::Text(text) => literal.push_str(text),
            _ => return ParameterSource::Deferred(list),
        }
    }
    ParameterSource::File(PathBuf::from(literal))
}

impl LaunchFile {
    /// Load a plan file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a plan file from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the plan file structure
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        validate_steps(&self.steps, "steps")
    }

    /// Number of steps, including nested group steps
    pub fn step_count(&self) -> usize {
        fn count(steps: &[StepSpec]) -> usize {
            steps
                .iter()
                .map(|s| 1 + s.group.as_ref().map(|g| count(&g.steps)).unwrap_or(0))
                .sum()
        }
        count(&self.steps)
    }

    /// Declared arguments merged with overrides.
    ///
    /// Overrides must name declared arguments. Arguments without a default or
    /// override are left out and fail when referenced.
    pub fn bind_arguments(
        &self,
        overrides: &HashMap<String, String>,
    ) -> Result<IndexMap<String, String>, LaunchFileError> {
        if let Some(unknown) = overrides.keys().find(|name| !self.args.contains_key(*name)) {
            return Err(LaunchFileError::UnknownArgument(unknown.clone()));
        }

        let mut bound = IndexMap::new();
        for (name, def) in &self.args {
            if let Some(value) = overrides.get(name) {
                bound.insert(name.clone(), value.clone());
            } else if let Some(default) = &def.default {
                bound.insert(name.clone(), default.as_str());
            }
        }
        Ok(bound)
    }

    /// Convert into composition steps
    pub fn into_steps(self) -> Result<Vec<CompositionStep>, LaunchFileError> {
        self.steps.into_iter().map(StepSpec::into_step).collect()
    }

    /// Convert into a sub-plan for an include
    pub fn into_sub_plan(self) -> Result<SubPlan, LaunchFileError> {
        let arguments = self
            .args
            .iter()
            .map(|(name, def)| (name.clone(), def.default.as_ref().map(ArgValue::as_str)))
            .collect();
        Ok(SubPlan {
            arguments,
            steps: self.into_steps()?,
        })
    }
}

fn validate_steps(steps: &[StepSpec], path: &str) -> Result<(), LaunchFileError> {
    for (i, step) in steps.iter().enumerate() {
        let location = format!("{}[{}]", path, i);
        match step.kinds().as_slice() {
            [_] => {}
            [] => {
                return Err(LaunchFileError::Validation(format!(
                    "{}: must specify one of 'container', 'process', 'set_remap', 'include' or 'group'",
                    location
                )));
            }
            kinds => {
                return Err(LaunchFileError::Validation(format!(
                    "{}: cannot specify more than one of {}",
                    location,
                    kinds.join(", ")
                )));
            }
        }

        if let Some(container) = &step.container {
            let mut names = HashSet::new();
            for module in &container.modules {
                if !names.insert(module.name.as_str()) {
                    return Err(LaunchFileError::Validation(format!(
                        "{}: container '{}' declares module '{}' twice",
                        location, container.name, module.name
                    )));
                }
            }
        }

        if let Some(group) = &step.group {
            validate_steps(&group.steps, &format!("{}.group.steps", location))?;
        }
    }
    Ok(())
}

/// Loads included sub-plans from YAML files on disk
#[derive(Debug, Clone, Default)]
pub struct YamlPlanSource;

impl YamlPlanSource {
    pub fn new() -> Self {
        Self
    }
}

impl PlanSource for YamlPlanSource {
    fn load(&self, location: &Path) -> Result<SubPlan, IncludeError> {
        if !location.is_file() {
            return Err(IncludeError::NotFound {
                location: location.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }

        LaunchFile::from_file(location)
            .and_then(LaunchFile::into_sub_plan)
            .map_err(|e| match e {
                LaunchFileError::Io { source, .. } => IncludeError::NotFound {
                    location: location.to_path_buf(),
                    reason: source.to_string(),
                },
                other => IncludeError::Invalid {
                    location: location.to_path_buf(),
                    reason: other.to_string(),
                },
            })
    }
}

/// Errors that can occur when loading a plan file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read plan file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid template in {context}: {source}")]
    Template {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
}
