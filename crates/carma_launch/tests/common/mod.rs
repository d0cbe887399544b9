//! Test helpers for plan file integration tests

#![allow(dead_code)]

use carma_launch::{
    AssembleError, LaunchContext, LaunchFile, Plan, PlanAssembler, YamlPlanSource,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Write a plan file into `dir` and return its path
pub fn write_plan(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// Load a plan file, bind its arguments and assemble it against `ctx`.
///
/// Returns the context extended with the bound arguments so callers can
/// resolve the plan with it.
pub fn assemble_file(
    path: &Path,
    overrides: &[(&str, &str)],
    ctx: LaunchContext,
) -> (LaunchContext, Result<Plan, AssembleError>) {
    let launch_file = LaunchFile::from_file(path).unwrap();
    let overrides: HashMap<String, String> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let ctx = ctx.with_configs(launch_file.bind_arguments(&overrides).unwrap());

    let mut assembler = PlanAssembler::new();
    assembler.extend(launch_file.into_steps().unwrap());
    let plan = assembler.assemble(&ctx, &YamlPlanSource::new());
    (ctx, plan)
}
