//! Deferred substitutions and the `$(type args...)` template parser

use crate::config::{Derived, ResolutionContext};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::sync::LazyLock;

/// Regex for matching substitution patterns: $(type args...)
///
/// Quoted arguments may contain `)`.
static SUBSTITUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$\(([\w-]+)(?:\s+((?:'[^']*'|"[^"]*"|[^)])*))?\)"#).unwrap()
});

/// A value producer evaluated against a resolution context
#[derive(Debug, Clone)]
pub enum Substitution {
    /// Literal text
    Text(String),
    /// Environment variable with an optional fallback
    EnvLookup {
        name: String,
        default: Option<String>,
    },
    /// Named configuration value (launch argument)
    ConfigValue(String),
    /// Share directory of a package
    PackageShare(String),
    /// Computed from other substitutions
    Derived(Derived),
}

impl Substitution {
    pub fn text(value: impl Into<String>) -> Self {
        Substitution::Text(value.into())
    }

    /// Environment lookup without a default
    pub fn env(name: impl Into<String>) -> Self {
        Substitution::EnvLookup {
            name: name.into(),
            default: None,
        }
    }

    /// Environment lookup falling back to `default`
    pub fn env_or(name: impl Into<String>, default: impl Into<String>) -> Self {
        Substitution::EnvLookup {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn config(name: impl Into<String>) -> Self {
        Substitution::ConfigValue(name.into())
    }

    pub fn package_share(package: impl Into<String>) -> Self {
        Substitution::PackageShare(package.into())
    }

    /// Evaluate against a context
    pub fn resolve(&self, ctx: &dyn ResolutionContext) -> Result<String, SubstitutionError> {
        match self {
            Substitution::Text(text) => Ok(text.clone()),
            Substitution::EnvLookup { name, default } => resolve_env(ctx, name, default.as_deref()),
            Substitution::ConfigValue(name) => ctx
                .config_value(name)
                .ok_or_else(|| SubstitutionError::UnresolvedConfig(name.clone())),
            Substitution::PackageShare(package) => ctx
                .locator()
                .share_directory(package)
                .map(|path| path.to_string_lossy().into_owned()),
            Substitution::Derived(derived) => derived.evaluate(ctx),
        }
    }
}

/// Resolve an environment variable reference
fn resolve_env(
    ctx: &dyn ResolutionContext,
    name: &str,
    default: Option<&str>,
) -> Result<String, SubstitutionError> {
    if let Some(value) = ctx.env_var(name) {
        return Ok(value);
    }

    match default {
        Some(default) => Ok(default.to_string()),
        None if ctx.strict() => Err(SubstitutionError::UnresolvedConfig(name.to_string())),
        None => {
            log::debug!(
                "Environment variable '{}' is not set and has no default, using empty string",
                name
            );
            Ok(String::new())
        }
    }
}

impl From<Derived> for Substitution {
    fn from(derived: Derived) -> Self {
        Substitution::Derived(derived)
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substitution::Text(text) => f.write_str(text),
            Substitution::EnvLookup {
                name,
                default: None,
            } => write!(f, "$(env {})", name),
            Substitution::EnvLookup {
                name,
                default: Some(default),
            } => {
                // A default holding both quote kinds cannot be written back
                let quote = if default.contains('\'') && !default.contains('"') {
                    '"'
                } else {
                    '\''
                };
                write!(f, "$(env {} {q}{}{q})", name, default, q = quote)
            }
            Substitution::ConfigValue(name) => write!(f, "$(arg {})", name),
            Substitution::PackageShare(package) => write!(f, "$(find-pkg-share {})", package),
            Substitution::Derived(derived) => fmt::Display::fmt(derived, f),
        }
    }
}

/// Ordered substitutions whose results are concatenated without separator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct SubstitutionList(Vec<Substitution>);

impl SubstitutionList {
    pub fn new(parts: Vec<Substitution>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[Substitution] {
        &self.0
    }

    pub fn push(&mut self, part: impl Into<Substitution>) {
        self.0.push(part.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every part in order and concatenate the results.
    ///
    /// The first failing part aborts the whole list.
    pub fn resolve(&self, ctx: &dyn ResolutionContext) -> Result<String, SubstitutionError> {
        let mut out = String::new();
        for part in &self.0 {
            out.push_str(&part.resolve(ctx)?);
        }
        Ok(out)
    }

    /// Parse a template string such as `$(env CARMA_GUIDE_NS '')/plan_trajectory`.
    ///
    /// Supported types: `env NAME [default]`, `arg NAME`, `find-pkg-share PKG`,
    /// `namespace`, `log-level PKG`. Text outside patterns is kept verbatim.
    pub fn parse(input: &str) -> Result<Self, SubstitutionError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
            let (Some(whole), Some(subst_type)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            if whole.start() > last {
                parts.push(Substitution::text(&input[last..whole.start()]));
            }

            let args = caps
                .get(2)
                .map(|m| split_args(m.as_str()))
                .transpose()?
                .unwrap_or_default();
            parts.push(parse_typed(subst_type.as_str(), &args, whole.as_str())?);
            last = whole.end();
        }

        if last < input.len() {
            parts.push(Substitution::text(&input[last..]));
        }

        Ok(Self(parts))
    }
}

/// Build a substitution from a parsed pattern
fn parse_typed(
    subst_type: &str,
    args: &[String],
    pattern: &str,
) -> Result<Substitution, SubstitutionError> {
    let invalid = || SubstitutionError::InvalidPattern(pattern.to_string());

    match (subst_type, args) {
        ("env", [name]) => Ok(Substitution::env(name.as_str())),
        ("env", [name, default]) => Ok(Substitution::env_or(name.as_str(), default.as_str())),
        ("arg", [name]) => Ok(Substitution::config(name.as_str())),
        ("find-pkg-share", [package]) => Ok(Substitution::package_share(package.as_str())),
        ("namespace", []) => Ok(Derived::current_namespace().into()),
        ("log-level", [package]) => Ok(Derived::env_log_level(package).into()),
        ("env" | "arg" | "find-pkg-share" | "namespace" | "log-level", _) => Err(invalid()),
        _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
    }
}

/// Split pattern arguments on whitespace, honouring single and double quotes
fn split_args(raw: &str) -> Result<Vec<String>, SubstitutionError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(SubstitutionError::InvalidPattern(raw.to_string()));
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}

impl TryFrom<String> for SubstitutionList {
    type Error = SubstitutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<&str> for SubstitutionList {
    fn from(text: &str) -> Self {
        Self(vec![Substitution::text(text)])
    }
}

impl From<Substitution> for SubstitutionList {
    fn from(part: Substitution) -> Self {
        Self(vec![part])
    }
}

impl From<Derived> for SubstitutionList {
    fn from(derived: Derived) -> Self {
        Self(vec![Substitution::Derived(derived)])
    }
}

impl From<Vec<Substitution>> for SubstitutionList {
    fn from(parts: Vec<Substitution>) -> Self {
        Self(parts)
    }
}

impl fmt::Display for SubstitutionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.0 {
            fmt::Display::fmt(part, f)?;
        }
        Ok(())
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unresolved configuration value: {0}")]
    UnresolvedConfig(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Failed to evaluate '{name}': {reason}")]
    DerivedEvaluationFailure { name: String, reason: String },

    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LaunchContext, StaticLocator};

    fn guide_entry() -> SubstitutionList {
        SubstitutionList::new(vec![
            Substitution::env_or("CARMA_GUIDE_NS", ""),
            Substitution::text("/plan_trajectory"),
        ])
    }

    #[test]
    fn test_env_present_ignores_default() {
        let ctx = LaunchContext::new().with_env("MY_VAR", "my_value");
        let result = Substitution::env_or("MY_VAR", "fallback").resolve(&ctx).unwrap();
        assert_eq!(result, "my_value");
    }

    #[test]
    fn test_env_absent_uses_default() {
        let ctx = LaunchContext::new();
        let result = Substitution::env_or("MY_VAR", "fallback").resolve(&ctx).unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_env_absent_without_default_is_empty() {
        let ctx = LaunchContext::new();
        assert_eq!(Substitution::env("MY_VAR").resolve(&ctx).unwrap(), "");
    }

    #[test]
    fn test_env_absent_without_default_strict() {
        let ctx = LaunchContext::new().with_strict(true);
        let err = Substitution::env("MY_VAR").resolve(&ctx).unwrap_err();
        assert!(matches!(err, SubstitutionError::UnresolvedConfig(ref n) if n == "MY_VAR"));

        // An explicit default still applies in strict mode
        let ok = Substitution::env_or("MY_VAR", "").resolve(&ctx).unwrap();
        assert_eq!(ok, "");
    }

    #[test]
    fn test_config_value() {
        let ctx = LaunchContext::new().with_config("vehicle_characteristics_path", "/opt/v.yaml");
        let result = Substitution::config("vehicle_characteristics_path")
            .resolve(&ctx)
            .unwrap();
        assert_eq!(result, "/opt/v.yaml");
    }

    #[test]
    fn test_undefined_config_error() {
        let ctx = LaunchContext::new();
        let result = Substitution::config("undefined").resolve(&ctx);
        assert!(matches!(result, Err(SubstitutionError::UnresolvedConfig(_))));
    }

    #[test]
    fn test_guide_namespace_present() {
        let ctx = LaunchContext::new().with_env("CARMA_GUIDE_NS", "/guide");
        assert_eq!(guide_entry().resolve(&ctx).unwrap(), "/guide/plan_trajectory");
    }

    #[test]
    fn test_guide_namespace_absent() {
        let ctx = LaunchContext::new();
        assert_eq!(guide_entry().resolve(&ctx).unwrap(), "/plan_trajectory");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let ctx = LaunchContext::new().with_env("CARMA_GUIDE_NS", "/guide");
        let entry = guide_entry();
        assert_eq!(entry.resolve(&ctx).unwrap(), entry.resolve(&ctx).unwrap());
    }

    #[test]
    fn test_package_share() {
        let ctx = LaunchContext::new()
            .with_locator(StaticLocator::new().with_package("mobilitypath_publisher", "/ws"));
        let list = SubstitutionList::parse("$(find-pkg-share mobilitypath_publisher)/config/parameters.yaml")
            .unwrap();
        assert_eq!(
            list.resolve(&ctx).unwrap(),
            "/ws/share/mobilitypath_publisher/config/parameters.yaml"
        );

        let missing = SubstitutionList::parse("$(find-pkg-share nope)").unwrap();
        assert!(matches!(
            missing.resolve(&ctx),
            Err(SubstitutionError::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_parse_env_with_quoted_default() {
        let list = SubstitutionList::parse("$(env CARMA_LOCZ_NS '')/map_param_loader/georeference")
            .unwrap();
        assert_eq!(list.parts().len(), 2);
        assert!(matches!(
            &list.parts()[0],
            Substitution::EnvLookup { name, default: Some(d) } if name == "CARMA_LOCZ_NS" && d.is_empty()
        ));
        assert!(matches!(&list.parts()[1], Substitution::Text(t) if t == "/map_param_loader/georeference"));
    }

    #[test]
    fn test_parse_multiple_substitutions() {
        let ctx = LaunchContext::new()
            .with_config("prefix", "data")
            .with_config("suffix", "log");
        let list = SubstitutionList::parse("$(arg prefix)_mid_$(arg suffix)").unwrap();
        assert_eq!(list.resolve(&ctx).unwrap(), "data_mid_log");
    }

    #[test]
    fn test_parse_derived_patterns() {
        let ctx = LaunchContext::new().with_namespace("carma");
        let ns = SubstitutionList::parse("$(namespace)").unwrap();
        assert_eq!(ns.resolve(&ctx).unwrap(), "/carma");

        let level = SubstitutionList::parse("$(log-level subsystem_controllers)").unwrap();
        assert_eq!(level.resolve(&ctx).unwrap(), "WARN");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SubstitutionList::parse("$(bogus x)"),
            Err(SubstitutionError::UnknownType(_))
        ));
        assert!(matches!(
            SubstitutionList::parse("$(arg)"),
            Err(SubstitutionError::InvalidPattern(_))
        ));
        assert!(matches!(
            SubstitutionList::parse("$(env A 'unterminated)"),
            Err(SubstitutionError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = LaunchContext::new();
        let list = SubstitutionList::parse("plain string").unwrap();
        assert_eq!(list.resolve(&ctx).unwrap(), "plain string");
    }

    #[test]
    fn test_display_round_trips_template() {
        let text = "$(env CARMA_GUIDE_NS '')/plan_trajectory";
        assert_eq!(SubstitutionList::parse(text).unwrap().to_string(), text);
    }

    #[test]
    fn test_deserialized_string_is_parsed_as_template() {
        let ctx = LaunchContext::new().with_env("CARMA_GUIDE_NS", "/guide");
        let list: SubstitutionList =
            serde_yaml::from_str(r#""$(env CARMA_GUIDE_NS '')/plan_trajectory""#).unwrap();
        assert_eq!(list.parts().len(), 2);
        assert_eq!(list.resolve(&ctx).unwrap(), "/guide/plan_trajectory");

        let owned: String = "$(arg rate)".to_string();
        let list: SubstitutionList = serde_json::from_value(serde_json::Value::String(owned)).unwrap();
        assert!(matches!(&list.parts()[0], Substitution::ConfigValue(name) if name == "rate"));

        let bad: Result<SubstitutionList, _> = serde_yaml::from_str(r#""$(bogus x)""#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_quoted_default_may_contain_parentheses() {
        let ctx = LaunchContext::new();
        let list = SubstitutionList::parse("$(env X '(a)')/tail").unwrap();
        assert!(matches!(
            &list.parts()[0],
            Substitution::EnvLookup { name, default: Some(d) } if name == "X" && d == "(a)"
        ));
        assert_eq!(list.resolve(&ctx).unwrap(), "(a)/tail");

        let double = SubstitutionList::parse(r#"$(env X "f(x)")"#).unwrap();
        assert_eq!(double.resolve(&ctx).unwrap(), "f(x)");
    }

    #[test]
    fn test_display_quotes_default_with_apostrophe() {
        let ctx = LaunchContext::new();
        let list = SubstitutionList::new(vec![Substitution::env_or("X", "it's (here)")]);
        let rendered = list.to_string();
        assert_eq!(rendered, r#"$(env X "it's (here)")"#);

        let reparsed = SubstitutionList::parse(&rendered).unwrap();
        assert_eq!(reparsed.resolve(&ctx).unwrap(), "it's (here)");
    }
}
