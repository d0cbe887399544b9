//! Plan composition: descriptors, remapping, assembly and resolution

mod assembler;
mod compose;
mod descriptor;
mod remap;
mod resolve;

pub use assembler::*;
pub use compose::*;
pub use descriptor::*;
pub use remap::*;
pub use resolve::*;
