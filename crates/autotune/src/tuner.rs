//! Cost function for black-box search over one variant's tuning constants.
//!
//! A [`CostFunction`] turns a parameter point into a build, compiles it in
//! test mode, runs the trials and reports the mean total time. It holds no
//! mutable state of its own, so any search strategy can call it.

use crate::collector::{Collector, MAX_COST};
use crate::sample::{MetricLayout, SampleParser};
use anyhow::{anyhow, bail, Result};
use kernelsweep_kernels::config::{
    BlockSize, CoarseFactor, Configuration, Device, KernelBuild, MatmulProblem, TuningParams,
};
use kernelsweep_kernels::toolchain::{
    ArtifactNaming, BuildCommand, RunCommand, Toolchain, ToolchainConfig, TrialRunner,
};
use kernelsweep_kernels::variant::{TuningAxis, Variant};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const TILE_SIZE: &str = "tile_size";
pub const BLOCK_SIZE_X: &str = "block_size_x";
pub const BLOCK_SIZE_Y: &str = "block_size_y";
pub const UNROLL_STEP: &str = "unroll_step";
pub const COARSE_FACTOR_X: &str = "coarse_factor_x";
pub const COARSE_FACTOR_Y: &str = "coarse_factor_y";

/// Parameter names to integer values, as proposed by an optimizer.
pub type ParamPoint = BTreeMap<String, i64>;

/// Parameter names a variant is tuned over, in column order.
pub fn parameter_names(variant: &Variant) -> Vec<&'static str> {
    let mut names = Vec::new();
    if variant.applies(TuningAxis::TileSize) {
        names.push(TILE_SIZE);
    } else {
        names.extend([BLOCK_SIZE_X, BLOCK_SIZE_Y]);
    }
    if variant.applies(TuningAxis::UnrollStep) {
        names.push(UNROLL_STEP);
    }
    if variant.applies(TuningAxis::CoarseFactor) {
        names.extend([COARSE_FACTOR_X, COARSE_FACTOR_Y]);
    }
    names
}

/// Converts a point into build constants for `variant`.
///
/// Only the parameters the variant understands are read; each of them must
/// be present and non-negative. Coarsening is always per axis.
pub fn tuning_params(variant: &Variant, point: &ParamPoint) -> Result<TuningParams> {
    let mut params = TuningParams::default();
    if variant.applies(TuningAxis::TileSize) {
        params = params.with_tile_size(read(point, TILE_SIZE)?);
    } else {
        params = params.with_block_size(read(point, BLOCK_SIZE_X)?, read(point, BLOCK_SIZE_Y)?);
    }
    if variant.applies(TuningAxis::UnrollStep) {
        params = params.with_unroll_step(read(point, UNROLL_STEP)?);
    }
    if variant.applies(TuningAxis::CoarseFactor) {
        params = params.with_coarse_factor(CoarseFactor::PerAxis {
            x: read(point, COARSE_FACTOR_X)?,
            y: read(point, COARSE_FACTOR_Y)?,
        });
    }
    Ok(params)
}

pub struct CostFunction<'a, T: ?Sized, R: ?Sized> {
    toolchain: &'a T,
    runner: &'a R,
    config: &'a ToolchainConfig,
    variant: Variant,
    device: Device,
    problem: MatmulProblem,
    collector: Collector,
    limit_ms: Option<f64>,
    naming: ArtifactNaming,
    skip_failed_builds: bool,
}

impl<'a, T, R> CostFunction<'a, T, R>
where
    T: Toolchain + ?Sized,
    R: TrialRunner + ?Sized,
{
    pub fn new(
        toolchain: &'a T,
        runner: &'a R,
        config: &'a ToolchainConfig,
        variant: Variant,
        device: Device,
        problem: MatmulProblem,
    ) -> Self {
        Self {
            toolchain,
            runner,
            config,
            variant,
            device,
            problem,
            collector: Collector::new(5, SampleParser::lenient(MetricLayout::Total)),
            limit_ms: Some(4000.0),
            naming: ArtifactNaming::InPlace,
            skip_failed_builds: true,
        }
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.collector = Collector::new(trials, *self.collector.parser());
        self
    }

    /// Per-trial limit above which the remaining trials are extrapolated.
    pub fn with_limit_ms(mut self, limit_ms: Option<f64>) -> Self {
        self.limit_ms = limit_ms;
        self
    }

    pub fn with_parser(mut self, parser: SampleParser) -> Self {
        self.collector = Collector::new(self.collector.trials(), parser);
        self
    }

    pub fn with_naming(mut self, naming: ArtifactNaming) -> Self {
        self.naming = naming;
        self
    }

    /// When false, a failed build still runs whatever executable is on disk.
    pub fn with_skip_failed_builds(mut self, skip: bool) -> Self {
        self.skip_failed_builds = skip;
        self
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn problem(&self) -> MatmulProblem {
        self.problem
    }

    pub fn params_for(&self, point: &ParamPoint) -> Result<TuningParams> {
        tuning_params(&self.variant, point)
    }

    /// A tiled kernel cannot coarsen past its tile, and zero-sized tiles,
    /// blocks or factors never launch.
    pub fn is_feasible(&self, params: &TuningParams) -> bool {
        let zero_block = params
            .block_size
            .is_some_and(|BlockSize { x, y }| x == 0 || y == 0);
        let zero_factor = params.coarse_factor.is_some_and(|f| match f {
            CoarseFactor::Uniform(f) => f == 0,
            CoarseFactor::PerAxis { x, y } => x == 0 || y == 0,
        });
        if params.tile_size == Some(0) || zero_block || zero_factor {
            return false;
        }
        match (params.tile_size, params.coarse_factor) {
            (Some(tile), Some(factor)) if self.variant.is_tiled() => factor.max_factor() <= tile,
            _ => true,
        }
    }

    /// Builds and measures one point. Unmeasurable points cost [`MAX_COST`].
    pub fn evaluate(&self, point: &ParamPoint) -> Result<f64> {
        let params = self.params_for(point)?;
        if !self.is_feasible(&params) {
            warn!(variant = %self.variant, params = %params.suffix(), "infeasible configuration");
            return Ok(MAX_COST);
        }

        let build = KernelBuild::new(self.device, self.variant.clone(), params);
        let command = BuildCommand::new(self.config, &build, self.naming, true);
        debug!(command = %command.command_line(), "compiling");
        let built = match self.toolchain.build(&command) {
            Ok(status) if status.succeeded() => true,
            Ok(status) => {
                warn!(
                    variant = %self.variant,
                    exit_code = ?status.exit_code,
                    artifact_present = status.artifact_present,
                    "build failed"
                );
                false
            }
            Err(err) => {
                warn!(variant = %self.variant, error = %err, "build could not run");
                false
            }
        };
        if !built && self.skip_failed_builds {
            return Ok(MAX_COST);
        }

        let configuration = Configuration::new(build, self.problem);
        let run = RunCommand::new(&command.artifact, &configuration);
        let measured = self.collector.measure_cost(self.runner, &run, self.limit_ms)?;
        info!(
            variant = %self.variant,
            device = %self.device,
            params = %params.suffix(),
            cost = measured.cost,
            trials = measured.trials_run,
            early_exit = measured.early_exit,
            "evaluated"
        );
        Ok(measured.cost)
    }
}

fn read(point: &ParamPoint, name: &str) -> Result<u32> {
    let value = *point
        .get(name)
        .ok_or_else(|| anyhow!("parameter `{name}` is missing"))?;
    if value < 0 {
        bail!("parameter `{name}` must be non-negative, got {value}");
    }
    u32::try_from(value).map_err(|_| anyhow!("parameter `{name}` is out of range: {value}"))
}
