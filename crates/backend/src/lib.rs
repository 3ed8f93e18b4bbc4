//! Process-backed execution for KernelSweep: the external compiler and the
//! compiled kernel executables.

pub mod runtime;
pub mod toolchain;

pub use runtime::*;
pub use toolchain::*;
