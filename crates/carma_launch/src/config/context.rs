//! Resolution context and package location lookup

use crate::config::SubstitutionError;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Namespace used when nothing has been pushed
pub const ROOT_NAMESPACE: &str = "/";

/// Environment variable listing ament install prefixes
pub const AMENT_PREFIX_PATH: &str = "AMENT_PREFIX_PATH";

/// Read-only view used to evaluate substitutions.
///
/// Implementations must answer synchronously and must not have side effects:
/// resolving the same substitution twice against one context yields the same
/// string.
pub trait ResolutionContext {
    /// Look up an environment variable
    fn env_var(&self, name: &str) -> Option<String>;

    /// Look up a named configuration value (a launch argument)
    fn config_value(&self, name: &str) -> Option<String>;

    /// Current namespace, always absolute
    fn namespace(&self) -> &str;

    /// Package location resolver
    fn locator(&self) -> &dyn PackageLocator;

    /// Whether an absent environment variable without a default is an error
    fn strict(&self) -> bool {
        false
    }
}

/// Resolves logical package names to install locations
pub trait PackageLocator: Debug + Send + Sync {
    /// Install prefix containing the package
    fn prefix(&self, package: &str) -> Result<PathBuf, SubstitutionError>;

    /// `<prefix>/share/<package>`
    fn share_directory(&self, package: &str) -> Result<PathBuf, SubstitutionError> {
        Ok(self.prefix(package)?.join("share").join(package))
    }

    /// `<prefix>/lib/<package>/<executable>`
    fn executable(&self, package: &str, executable: &str) -> Result<PathBuf, SubstitutionError> {
        Ok(self.prefix(package)?.join("lib").join(package).join(executable))
    }
}

/// Locator backed by an explicit package → prefix table
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    prefixes: HashMap<String, PathBuf>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the install prefix of a package
    pub fn with_package(mut self, package: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        self.prefixes.insert(package.into(), prefix.into());
        self
    }
}

impl PackageLocator for StaticLocator {
    fn prefix(&self, package: &str) -> Result<PathBuf, SubstitutionError> {
        self.prefixes
            .get(package)
            .cloned()
            .ok_or_else(|| SubstitutionError::PackageNotFound(package.to_string()))
    }
}

/// Locator that searches ament install prefixes for a package marker file
#[derive(Debug, Clone, Default)]
pub struct AmentIndexLocator {
    prefixes: Vec<PathBuf>,
}

impl AmentIndexLocator {
    pub fn new(prefixes: Vec<PathBuf>) -> Self {
        Self { prefixes }
    }

    /// Build from `AMENT_PREFIX_PATH` in the process environment
    pub fn from_env() -> Self {
        let prefixes = std::env::var_os(AMENT_PREFIX_PATH)
            .map(|value| std::env::split_paths(&value).collect())
            .unwrap_or_default();
        Self { prefixes }
    }

    fn marker(prefix: &Path, package: &str) -> PathBuf {
        prefix
            .join("share/ament_index/resource_index/packages")
            .join(package)
    }
}

impl PackageLocator for AmentIndexLocator {
    fn prefix(&self, package: &str) -> Result<PathBuf, SubstitutionError> {
        self.prefixes
            .iter()
            .find(|prefix| Self::marker(prefix, package).is_file())
            .cloned()
            .ok_or_else(|| SubstitutionError::PackageNotFound(package.to_string()))
    }
}

/// Locator consulting an override table before falling back to another locator
#[derive(Debug, Clone)]
pub struct LayeredLocator {
    overrides: StaticLocator,
    fallback: Arc<dyn PackageLocator>,
}

impl LayeredLocator {
    pub fn new(overrides: StaticLocator, fallback: Arc<dyn PackageLocator>) -> Self {
        Self { overrides, fallback }
    }
}

impl PackageLocator for LayeredLocator {
    fn prefix(&self, package: &str) -> Result<PathBuf, SubstitutionError> {
        self.overrides
            .prefix(package)
            .or_else(|_| self.fallback.prefix(package))
    }
}

/// Top-level resolution context for a launch request
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Environment values visible to `$(env ...)`
    pub env: HashMap<String, String>,
    /// Launch arguments visible to `$(arg ...)`
    pub configs: IndexMap<String, String>,
    /// Fall back to the process environment when `env` has no entry
    pub inherit_env: bool,
    /// Strict environment policy
    pub strict: bool,
    namespace: String,
    locator: Arc<dyn PackageLocator>,
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            configs: IndexMap::new(),
            inherit_env: false,
            strict: false,
            namespace: ROOT_NAMESPACE.to_string(),
            locator: Arc::new(StaticLocator::default()),
        }
    }
}

impl LaunchContext {
    /// Create an isolated context that never reads the process environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context backed by the process environment and ament index
    pub fn from_process_env() -> Self {
        Self {
            inherit_env: true,
            locator: Arc::new(AmentIndexLocator::from_env()),
            ..Self::default()
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add a configuration value
    pub fn with_config(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(name.into(), value.into());
        self
    }

    /// Add multiple configuration values
    pub fn with_configs(mut self, configs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Set the base namespace
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = join_namespace(ROOT_NAMESPACE, namespace);
        self
    }

    /// Replace the package locator
    pub fn with_locator(mut self, locator: impl PackageLocator + 'static) -> Self {
        self.locator = Arc::new(locator);
        self
    }

    /// Toggle the strict environment policy
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Shared handle to the current locator
    pub fn shared_locator(&self) -> Arc<dyn PackageLocator> {
        Arc::clone(&self.locator)
    }
}

impl ResolutionContext for LaunchContext {
    fn env_var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.env.get(name) {
            return Some(value.clone());
        }
        if self.inherit_env {
            return std::env::var(name).ok();
        }
        None
    }

    fn config_value(&self, name: &str) -> Option<String> {
        self.configs.get(name).cloned()
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn locator(&self) -> &dyn PackageLocator {
        self.locator.as_ref()
    }

    fn strict(&self) -> bool {
        self.strict
    }
}

/// Child context layering configuration values and a namespace over a parent.
///
/// Used for included sub-plans and namespaced groups; the parent is never
/// modified.
#[derive(Clone)]
pub struct ScopedContext<'a> {
    parent: &'a dyn ResolutionContext,
    configs: IndexMap<String, String>,
    namespace: Option<String>,
}

impl<'a> ScopedContext<'a> {
    pub fn new(parent: &'a dyn ResolutionContext) -> Self {
        Self {
            parent,
            configs: IndexMap::new(),
            namespace: None,
        }
    }

    /// Overlay configuration values (they shadow the parent's)
    pub fn with_configs(mut self, configs: IndexMap<String, String>) -> Self {
        self.configs.extend(configs);
        self
    }

    /// Push a namespace relative to the parent's
    pub fn push_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(join_namespace(self.parent.namespace(), namespace));
        self
    }
}

impl ResolutionContext for ScopedContext<'_> {
    fn env_var(&self, name: &str) -> Option<String> {
        self.parent.env_var(name)
    }

    fn config_value(&self, name: &str) -> Option<String> {
        self.configs
            .get(name)
            .cloned()
            .or_else(|| self.parent.config_value(name))
    }

    fn namespace(&self) -> &str {
        match &self.namespace {
            Some(namespace) => namespace,
            None => self.parent.namespace(),
        }
    }

    fn locator(&self) -> &dyn PackageLocator {
        self.parent.locator()
    }

    fn strict(&self) -> bool {
        self.parent.strict()
    }
}

/// Join a namespace onto a base namespace.
///
/// Absolute namespaces replace the base; relative ones are appended. The
/// result always starts with `/` and never ends with one (except the root).
pub fn join_namespace(base: &str, namespace: &str) -> String {
    let joined = if namespace.starts_with('/') {
        namespace.to_string()
    } else if namespace.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), namespace)
    };

    let trimmed = joined.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT_NAMESPACE.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
