//! Search-space descriptions consumed by optimizers.
//!
//! The JSON form is what external black-box optimizers are pointed at; the
//! built-in strategies read the same structure.

use anyhow::{bail, Context, Result};
use kernelsweep_autotune::tuner::{
    parameter_names, ParamPoint, BLOCK_SIZE_X, BLOCK_SIZE_Y, COARSE_FACTOR_X, COARSE_FACTOR_Y,
    TILE_SIZE, UNROLL_STEP,
};
use kernelsweep_kernels::config::Device;
use kernelsweep_kernels::variant::Variant;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Objective column name shared with the samples log.
pub const OBJECTIVE: &str = "Time";

/// Largest integer range a space may declare.
pub const MAX_PARAMETER_VALUES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "parameter_type", rename_all = "snake_case")]
pub enum ParameterKind {
    Ordinal { values: Vec<i64> },
    Integer { min: i64, max: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

impl Parameter {
    pub fn ordinal(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Ordinal { values },
        }
    }

    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Integer { min, max },
        }
    }

    /// The `index`-th admissible value in declaration order.
    pub fn value_at(&self, index: usize) -> Option<i64> {
        match &self.kind {
            ParameterKind::Ordinal { values } => values.get(index).copied(),
            ParameterKind::Integer { min, max } => {
                let value = min.checked_add(i64::try_from(index).ok()?)?;
                (value <= *max).then_some(value)
            }
        }
    }

    /// Number of admissible values, saturating at `usize::MAX`.
    pub fn cardinality(&self) -> usize {
        match &self.kind {
            ParameterKind::Ordinal { values } => values.len(),
            ParameterKind::Integer { min, max } if max >= min => {
                let span = i128::from(*max) - i128::from(*min) + 1;
                usize::try_from(span).unwrap_or(usize::MAX)
            }
            ParameterKind::Integer { .. } => 0,
        }
    }

    pub fn sample(&self, rng: &mut fastrand::Rng) -> Option<i64> {
        match &self.kind {
            ParameterKind::Ordinal { values } if !values.is_empty() => {
                Some(values[rng.usize(..values.len())])
            }
            ParameterKind::Integer { min, max } if max >= min => Some(rng.i64(*min..=*max)),
            _ => None,
        }
    }
}

/// Value sets used by [`SearchSpace::for_variant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceDefaults {
    pub tile_sizes: Vec<i64>,
    pub block_sizes: Vec<i64>,
    pub unroll_steps: Vec<i64>,
    pub coarse_factors: Vec<i64>,
    pub iterations: usize,
}

impl SpaceDefaults {
    /// Value set of a tuning parameter; empty for unknown names.
    pub fn values_for(&self, name: &str) -> &[i64] {
        match name {
            TILE_SIZE => &self.tile_sizes,
            BLOCK_SIZE_X | BLOCK_SIZE_Y => &self.block_sizes,
            UNROLL_STEP => &self.unroll_steps,
            COARSE_FACTOR_X | COARSE_FACTOR_Y => &self.coarse_factors,
            _ => &[],
        }
    }
}

impl Default for SpaceDefaults {
    fn default() -> Self {
        Self {
            tile_sizes: vec![4, 8, 16, 32],
            block_sizes: vec![1, 2, 4, 8, 16, 32],
            unroll_steps: vec![0, 1, 4, 8, 16, 32, 64],
            coarse_factors: vec![1, 2, 4, 8],
            iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub name: String,
    pub objective: String,
    /// Evaluation budget for budgeted strategies.
    pub iterations: usize,
    pub parameters: Vec<Parameter>,
}

impl SearchSpace {
    pub fn new(name: impl Into<String>, iterations: usize, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            objective: OBJECTIVE.to_string(),
            iterations,
            parameters,
        }
    }

    /// The space a variant is tuned over: tile or block sizes, then unroll
    /// step and per-axis coarsening where the variant takes them.
    pub fn for_variant(variant: &Variant, device: Device, defaults: &SpaceDefaults) -> Self {
        let parameters = parameter_names(variant)
            .into_iter()
            .map(|name| Parameter::ordinal(name, defaults.values_for(name).to_vec()))
            .collect();
        Self::new(format!("{variant}_{device}"), defaults.iterations, parameters)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Number of distinct points, saturating on overflow.
    pub fn cardinality(&self) -> usize {
        if self.parameters.is_empty() {
            return 0;
        }
        self.parameters
            .iter()
            .fold(1usize, |acc, p| acc.saturating_mul(p.cardinality()))
    }

    /// Cartesian product of all parameters, last parameter fastest.
    pub fn grid(&self) -> GridPoints<'_> {
        let sizes: Vec<usize> = self.parameters.iter().map(Parameter::cardinality).collect();
        let exhausted = sizes.is_empty() || sizes.contains(&0);
        GridPoints {
            space: self,
            indices: vec![0; sizes.len()],
            sizes,
            exhausted,
        }
    }

    pub fn sample(&self, rng: &mut fastrand::Rng) -> Option<ParamPoint> {
        self.parameters
            .iter()
            .map(|p| p.sample(rng).map(|v| (p.name.clone(), v)))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            bail!("search space `{}` has no parameters", self.name);
        }
        for parameter in &self.parameters {
            match parameter.cardinality() {
                0 => bail!(
                    "parameter `{}` of search space `{}` admits no values",
                    parameter.name,
                    self.name
                ),
                n if n > MAX_PARAMETER_VALUES => bail!(
                    "parameter `{}` of search space `{}` spans {n} values, more than {MAX_PARAMETER_VALUES}",
                    parameter.name,
                    self.name
                ),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read search space {}", path.display()))?;
        let space: Self = serde_json::from_slice(&data)
            .with_context(|| format!("invalid search space {}", path.display()))?;
        space.validate()?;
        Ok(space)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("failed to write search space {}", path.display()))?;
        Ok(())
    }
}

/// Lazy cartesian product; integer ranges are stepped, never materialized.
pub struct GridPoints<'a> {
    space: &'a SearchSpace,
    sizes: Vec<usize>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl Iterator for GridPoints<'_> {
    type Item = ParamPoint;

    fn next(&mut self) -> Option<ParamPoint> {
        if self.exhausted {
            return None;
        }
        let point = self
            .space
            .parameters
            .iter()
            .zip(&self.indices)
            .map(|(p, &i)| p.value_at(i).map(|v| (p.name.clone(), v)))
            .collect::<Option<ParamPoint>>();
        let Some(point) = point else {
            self.exhausted = true;
            return None;
        };

        self.exhausted = true;
        for axis in (0..self.indices.len()).rev() {
            self.indices[axis] += 1;
            if self.indices[axis] < self.sizes[axis] {
                self.exhausted = false;
                break;
            }
            self.indices[axis] = 0;
        }
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_spaces_follow_axes() {
        let defaults = SpaceDefaults::default();
        let tiled = SearchSpace::for_variant(
            &Variant::new("mat_mul_tiling_wt_thread_coarsening_and_unroll"),
            Device::Gpu,
            &defaults,
        );
        assert_eq!(tiled.name, "mat_mul_tiling_wt_thread_coarsening_and_unroll_GPU");
        assert_eq!(
            tiled.parameter_names(),
            vec![TILE_SIZE, UNROLL_STEP, COARSE_FACTOR_X, COARSE_FACTOR_Y]
        );

        let naive = SearchSpace::for_variant(&Variant::new("mat_mul_naive"), Device::Cpu, &defaults);
        assert_eq!(naive.parameter_names(), vec![BLOCK_SIZE_X, BLOCK_SIZE_Y]);
        assert_eq!(naive.cardinality(), 36);
    }

    #[test]
    fn grid_enumerates_last_parameter_fastest() {
        let space = SearchSpace::new(
            "s",
            10,
            vec![Parameter::ordinal("a", vec![1, 2]), Parameter::integer("b", 5, 7)],
        );
        let points: Vec<(i64, i64)> = space.grid().map(|p| (p["a"], p["b"])).collect();
        assert_eq!(points, vec![(1, 5), (1, 6), (1, 7), (2, 5), (2, 6), (2, 7)]);
        assert_eq!(space.cardinality(), 6);
    }

    #[test]
    fn empty_parameter_empties_grid() {
        let space = SearchSpace::new("s", 10, vec![Parameter::ordinal("a", vec![])]);
        assert_eq!(space.grid().count(), 0);
        assert!(space.validate().is_err());
        assert!(space.sample(&mut fastrand::Rng::with_seed(1)).is_none());
    }

    #[test]
    fn extreme_integer_ranges_do_not_overflow() {
        let full = Parameter::integer("x", i64::MIN, i64::MAX);
        assert_eq!(full.cardinality(), usize::MAX);
        assert_eq!(full.value_at(0), Some(i64::MIN));
        assert_eq!(Parameter::integer("y", 5, 4).cardinality(), 0);

        let space = SearchSpace::new("wide", 10, vec![Parameter::integer("x", i64::MIN, i64::MAX)]);
        assert!(space.validate().is_err());
        let first: Vec<i64> = space.grid().take(3).map(|p| p["x"]).collect();
        assert_eq!(first, vec![i64::MIN, i64::MIN + 1, i64::MIN + 2]);

        let tail = SearchSpace::new("tail", 10, vec![Parameter::integer("x", i64::MAX - 1, i64::MAX)]);
        assert!(tail.validate().is_ok());
        let values: Vec<i64> = tail.grid().map(|p| p["x"]).collect();
        assert_eq!(values, vec![i64::MAX - 1, i64::MAX]);
    }

    #[test]
    fn json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("json/GPU/mat_mul_tiling.json");
        let space = SearchSpace::for_variant(
            &Variant::new("mat_mul_tiling"),
            Device::Gpu,
            &SpaceDefaults::default(),
        );
        space.save_to_file(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"parameter_type\": \"ordinal\""));
        assert_eq!(SearchSpace::load_from_file(&path).unwrap(), space);
    }
}
