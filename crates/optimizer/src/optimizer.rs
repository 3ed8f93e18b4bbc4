//! Optimizer trait and the built-in search strategies.

use crate::space::SearchSpace;
use anyhow::Result;
use kernelsweep_autotune::tuner::ParamPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub point: ParamPoint,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Evaluations in the order they were made.
    pub evaluations: Vec<Evaluation>,
}

impl SearchOutcome {
    pub fn push(&mut self, point: ParamPoint, cost: f64) {
        self.evaluations.push(Evaluation { point, cost });
    }

    /// Lowest cost; the earliest evaluation wins ties.
    pub fn best(&self) -> Option<&Evaluation> {
        self.evaluations.iter().fold(None, |best, candidate| match best {
            Some(b) if b.cost <= candidate.cost => Some(b),
            _ => Some(candidate),
        })
    }
}

/// Black-box minimizer over a [`SearchSpace`].
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    /// Minimizes `objective` over `space`. Objective errors abort the search.
    fn optimize(
        &self,
        space: &SearchSpace,
        objective: &mut dyn FnMut(&ParamPoint) -> Result<f64>,
    ) -> Result<SearchOutcome>;
}

/// Exhaustive enumeration in grid order.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridSearch {
    /// Stop after the space's `iterations` evaluations.
    budgeted: bool,
}

impl GridSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn budgeted() -> Self {
        Self { budgeted: true }
    }
}

impl Optimizer for GridSearch {
    fn name(&self) -> &str {
        "grid"
    }

    fn optimize(
        &self,
        space: &SearchSpace,
        objective: &mut dyn FnMut(&ParamPoint) -> Result<f64>,
    ) -> Result<SearchOutcome> {
        space.validate()?;
        let limit = if self.budgeted {
            space.iterations
        } else {
            usize::MAX
        };
        info!(space = %space.name, points = space.cardinality(), limit, "grid search");

        let mut outcome = SearchOutcome::default();
        for point in space.grid().take(limit) {
            let cost = objective(&point)?;
            debug!(?point, cost, "evaluated");
            outcome.push(point, cost);
        }
        Ok(outcome)
    }
}

/// Uniform random proposals from a seeded generator.
///
/// Repeated proposals reuse the memoized cost and are not evaluated again.
#[derive(Debug, Clone, Copy)]
pub struct RandomSearch {
    seed: u64,
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self { seed: 0x5eed }
    }
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Optimizer for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn optimize(
        &self,
        space: &SearchSpace,
        objective: &mut dyn FnMut(&ParamPoint) -> Result<f64>,
    ) -> Result<SearchOutcome> {
        space.validate()?;
        info!(space = %space.name, iterations = space.iterations, seed = self.seed, "random search");

        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut seen: HashMap<ParamPoint, f64> = HashMap::new();
        let mut outcome = SearchOutcome::default();
        let cardinality = space.cardinality();

        for _ in 0..space.iterations {
            if seen.len() >= cardinality {
                break;
            }
            let Some(point) = space.sample(&mut rng) else {
                break;
            };
            if let Some(cost) = seen.get(&point) {
                debug!(?point, cost, "memoized");
                continue;
            }
            let cost = objective(&point)?;
            debug!(?point, cost, "evaluated");
            seen.insert(point.clone(), cost);
            outcome.push(point, cost);
        }
        Ok(outcome)
    }
}
