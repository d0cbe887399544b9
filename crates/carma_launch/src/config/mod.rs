//! Resolution context, substitutions and plan file parsing

mod context;
mod derived;
mod launch_file;
mod substitution;

pub use context::*;
pub use derived::*;
pub use launch_file::*;
pub use substitution::*;
