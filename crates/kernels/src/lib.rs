//! Kernel variants, tuning constants and command surfaces for KernelSweep.

pub mod config;
pub mod registry;
pub mod toolchain;
pub mod variant;

pub use config::*;
pub use registry::*;
pub use toolchain::*;
pub use variant::*;
