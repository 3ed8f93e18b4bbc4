//! KernelSweep driver: configuration, campaign modes and reporting.

pub mod baseline;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod report;
pub mod session;

pub use baseline::*;
#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use report::*;
pub use session::*;
