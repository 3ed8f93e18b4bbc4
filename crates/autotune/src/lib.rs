//! Sweep engine for KernelSweep: enumeration, sample collection,
//! aggregation, result tables, resume checkpoints, ranking and the cost
//! function used by black-box search.

pub mod checkpoint;
pub mod collector;
pub mod sample;
pub mod space;
pub mod stats;
pub mod table;
pub mod topk;
pub mod tuner;

pub use checkpoint::*;
pub use collector::*;
pub use sample::*;
pub use space::*;
pub use stats::*;
pub use table::*;
pub use topk::*;
pub use tuner::*;
