//! KernelSweep: autotuning sweeps for matmul kernel variants.
//!
//! Re-exports the member crates so downstream tools can depend on one
//! package.

pub use kernelsweep_autotune as autotune;
pub use kernelsweep_backend as backend;
pub use kernelsweep_kernels as kernels;
pub use kernelsweep_optimizer as optimizer;
pub use kernelsweep_sweep as sweep;
