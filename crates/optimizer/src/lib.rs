//! Black-box search over kernel tuning constants.
//!
//! # Key Components
//!
//! - [`space::SearchSpace`]: parameters and budget, loadable from JSON
//! - [`optimizer::Optimizer`]: minimizes a cost over a space
//! - [`samples::SampleLog`]: per-evaluation log; [`samples::best_sample`] picks the winner

pub mod optimizer;
pub mod samples;
pub mod space;

pub use optimizer::{Evaluation, GridSearch, Optimizer, RandomSearch, SearchOutcome};
pub use samples::{best_sample, samples_file_name, BestSample, SampleLog};
pub use space::{Parameter, ParameterKind, SearchSpace, SpaceDefaults, OBJECTIVE};
