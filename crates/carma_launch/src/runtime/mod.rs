//! Runtime components: supervision and local process management

pub mod executor;
pub mod process;
pub mod supervisor;

pub use executor::*;
pub use process::*;
pub use supervisor::*;
