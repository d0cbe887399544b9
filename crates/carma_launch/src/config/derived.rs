//! Computed substitutions (log levels, current namespace)

use crate::config::{ResolutionContext, Substitution, SubstitutionError, SubstitutionList};
use std::fmt;
use std::sync::Arc;

/// Environment variable holding the JSON logging configuration
pub const LOGGING_CONFIG_ENV: &str = "CARMA_ROS_LOGGING_CONFIG";

/// Logging configuration used when the environment does not provide one
pub const DEFAULT_LOGGING_CONFIG: &str = r#"{ "default_level" : "WARN" }"#;

/// Level returned when the configuration names neither the package nor a default
pub const FALLBACK_LOG_LEVEL: &str = "WARN";

/// Evaluation rule of a derived substitution.
///
/// Receives the resolved inputs in declaration order.
pub type DerivedFn = dyn Fn(&[String], &dyn ResolutionContext) -> Result<String, String> + Send + Sync;

/// A substitution computed from other substitutions
#[derive(Clone)]
pub struct Derived {
    name: String,
    inputs: Vec<SubstitutionList>,
    eval: Arc<DerivedFn>,
}

impl Derived {
    pub fn new<F>(name: impl Into<String>, inputs: Vec<SubstitutionList>, eval: F) -> Self
    where
        F: Fn(&[String], &dyn ResolutionContext) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            inputs,
            eval: Arc::new(eval),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve every input, then run the evaluation rule.
    ///
    /// Input failures are returned unchanged; only a failure of the rule itself
    /// becomes `DerivedEvaluationFailure`.
    pub fn evaluate(&self, ctx: &dyn ResolutionContext) -> Result<String, SubstitutionError> {
        let values = self
            .inputs
            .iter()
            .map(|input| input.resolve(ctx))
            .collect::<Result<Vec<_>, _>>()?;

        (self.eval)(&values, ctx).map_err(|reason| SubstitutionError::DerivedEvaluationFailure {
            name: self.name.clone(),
            reason,
        })
    }

    /// Log level of `package` according to a JSON logging configuration.
    ///
    /// The configuration maps package names to levels and may carry a
    /// `default_level` entry.
    pub fn log_level(package: &str, config: impl Into<SubstitutionList>) -> Self {
        let package_name = package.to_string();
        Self::new(
            format!("log-level {}", package),
            vec![config.into()],
            move |inputs, _| {
                let raw = inputs.first().map(String::as_str).unwrap_or_default();
                level_for_package(raw, &package_name)
            },
        )
    }

    /// Log level of `package` read from `CARMA_ROS_LOGGING_CONFIG`
    pub fn env_log_level(package: &str) -> Self {
        Self::log_level(
            package,
            Substitution::env_or(LOGGING_CONFIG_ENV, DEFAULT_LOGGING_CONFIG),
        )
    }

    /// The namespace of the context the value is resolved in
    pub fn current_namespace() -> Self {
        Self::new("namespace", Vec::new(), |_, ctx| Ok(ctx.namespace().to_string()))
    }
}

impl fmt::Debug for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$({})", self.name)
    }
}

fn level_for_package(raw: &str, package: &str) -> Result<String, String> {
    let config: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("invalid logging config: {}", e))?;
    let table = config
        .as_object()
        .ok_or_else(|| "logging config must be a JSON object".to_string())?;

    let level = table
        .get(package)
        .or_else(|| table.get("default_level"))
        .map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| FALLBACK_LOG_LEVEL.to_string());

    Ok(level)
}
