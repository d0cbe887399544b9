//! Command-line interface for carma_launch

use argh::FromArgs;
use std::collections::HashMap;
use std::path::PathBuf;

/// Compose and launch a CARMA subsystem plan
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the plan file (default: launch/v2x.launch.yaml)
    #[argh(positional, default = "String::from(\"launch/v2x.launch.yaml\")")]
    pub plan_file: String,

    /// override plan arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// package install prefix searched before AMENT_PREFIX_PATH (format: package=path)
    #[argh(option, from_str_fn(parse_prefix))]
    pub prefix: Vec<(String, PathBuf)>,

    /// base namespace for the plan (default: /)
    #[argh(option, default = "String::from(\"/\")")]
    pub namespace: String,

    /// fail on environment variables that are unset and have no default
    #[argh(switch)]
    pub strict: bool,

    /// show resolved launch units without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// print the resolved units as JSON (with --dry-run)
    #[argh(switch)]
    pub json: bool,

    /// validate plan file and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

/// Parse package prefix in format "package=path"
fn parse_prefix(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((package, path)) if !package.is_empty() && !path.is_empty() => {
            Ok((package.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!(
            "Invalid prefix format '{}'. Expected 'package=path'",
            s
        )),
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Filter for env_logger; unknown levels fall back to info
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
