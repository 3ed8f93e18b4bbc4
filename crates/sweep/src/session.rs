//! Sweep session orchestration.
//!
//! A session borrows a toolchain and a trial runner and drives them through
//! one of the campaign modes. Everything is sequential: one build at a time,
//! then one trial at a time.

use crate::baseline::select_baselines;
use crate::config::{SearchStrategy, SweepConfig};
use anyhow::{Context, Result};
use kernelsweep_autotune::checkpoint::{load_checkpoint, Checkpoint, CheckpointLog};
use kernelsweep_autotune::collector::Collector;
use kernelsweep_autotune::sample::Sample;
use kernelsweep_autotune::space::{SweepCursor, SweepSpace, SweepStep};
use kernelsweep_autotune::stats::ResultRecord;
use kernelsweep_autotune::table::{ResultTable, TableNaming, TableSchema};
use kernelsweep_autotune::tuner::{tuning_params, CostFunction, ParamPoint};
use kernelsweep_kernels::config::{Configuration, Device, KernelBuild};
use kernelsweep_kernels::toolchain::{ArtifactNaming, BuildCommand, RunCommand, Toolchain, TrialRunner};
use kernelsweep_kernels::variant::Variant;
use kernelsweep_optimizer::optimizer::{Evaluation, GridSearch, Optimizer, RandomSearch};
use kernelsweep_optimizer::samples::{best_sample, samples_file_name, SampleLog};
use kernelsweep_optimizer::space::SearchSpace;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a sweep starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SweepStart {
    /// From the last position in the checkpoint log, or the beginning.
    #[default]
    Resume,
    /// From the beginning, discarding the log.
    Fresh,
    /// From an explicit position; overrides the log.
    At(SweepCursor),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub steps: usize,
    pub records: usize,
    pub failed_builds: usize,
    pub failed_trials: usize,
    /// The log said the sweep had already finished; nothing was run.
    pub already_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneResult {
    pub variant: Variant,
    pub device: Device,
    pub samples: PathBuf,
    pub evaluations: usize,
    pub best: Option<Evaluation>,
}

pub struct SweepSession<'a, T: ?Sized, R: ?Sized> {
    config: &'a SweepConfig,
    toolchain: &'a T,
    runner: &'a R,
}

impl<'a, T, R> SweepSession<'a, T, R>
where
    T: Toolchain + ?Sized,
    R: TrialRunner + ?Sized,
{
    pub fn new(config: &'a SweepConfig, toolchain: &'a T, runner: &'a R) -> Self {
        Self {
            config,
            toolchain,
            runner,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        self.config
    }

    fn collector(&self, trials: usize) -> Collector {
        Collector::new(trials, self.config.parser())
    }

    /// Full enumeration of `space` with a resume checkpoint.
    ///
    /// The log gets the next position after every completed build step, and
    /// `complete` after the last one. Log problems only cost resumability.
    pub fn run_sweep(&self, space: &SweepSpace, start: SweepStart) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let cursor = match start {
            SweepStart::Fresh => SweepCursor::default(),
            SweepStart::At(cursor) => cursor,
            SweepStart::Resume => match load_checkpoint(&self.config.checkpoint) {
                Ok(Checkpoint::Complete) => {
                    info!(checkpoint = %self.config.checkpoint.display(), "sweep already complete");
                    summary.already_complete = true;
                    return Ok(summary);
                }
                Ok(checkpoint) => checkpoint.start_cursor().unwrap_or_default(),
                Err(err) => {
                    warn!(error = %err, "unreadable checkpoint, starting from the beginning");
                    SweepCursor::default()
                }
            },
        };

        let fresh_log = cursor == SweepCursor::default();
        let mut log = match CheckpointLog::open(&self.config.checkpoint, fresh_log) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!(error = %err, "checkpoint log unavailable, sweep will not be resumable");
                None
            }
        };

        let total = space.len();
        let collector = self.collector(self.config.trials);
        info!(start = %cursor, steps = total, "starting sweep");

        let mut steps = space.iter_from(cursor);
        while let Some(step) = steps.next() {
            info!(
                device = %step.build.device,
                tile_size = ?step.build.params.tile_size,
                variant = %step.build.variant,
                params = %step.build.params.suffix(),
                "sweep step {}/{}",
                summary.steps + 1,
                total
            );
            self.run_step(space, &step, &collector, &mut summary)?;
            summary.steps += 1;
            record_position(&mut log, steps.peek_cursor());
        }
        if summary.steps == 0 {
            record_position(&mut log, None);
        }

        info!(
            steps = summary.steps,
            records = summary.records,
            failed_builds = summary.failed_builds,
            failed_trials = summary.failed_trials,
            "sweep finished"
        );
        Ok(summary)
    }

    fn run_step(
        &self,
        space: &SweepSpace,
        step: &SweepStep,
        collector: &Collector,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        let config = self.config;
        let built = self.build(&step.build, config.artifact_naming);
        if !built.1 {
            summary.failed_builds += 1;
        }

        let schema = TableSchema::new(config.layout, collector.trials());
        let path = config
            .table_naming
            .path(&config.output_dir, &config.table_prefix, &step.build);
        let mut table = match config.table_naming {
            TableNaming::PerConfiguration => ResultTable::create(&path, schema)?,
            TableNaming::PerVariant => ResultTable::append(&path, schema)?,
        };

        for configuration in space.configurations(step) {
            let record = self.measure(configuration, &built, collector)?;
            summary.records += 1;
            summary.failed_trials += record.failed_trials();
            table.write(&record)?;
        }
        Ok(())
    }

    fn build(&self, build: &KernelBuild, naming: ArtifactNaming) -> (BuildCommand, bool) {
        self.compile(BuildCommand::new(&self.config.toolchain, build, naming, false))
    }

    /// Runs one build command; returns it with whether it produced an
    /// executable. A compiler that cannot be launched counts as a failed build.
    fn compile(&self, command: BuildCommand) -> (BuildCommand, bool) {
        let succeeded = match self.toolchain.build(&command) {
            Ok(status) => status.succeeded(),
            Err(err) => {
                warn!(error = %err, command = %command.command_line(), "build could not run");
                false
            }
        };
        (command, succeeded)
    }

    fn measure(
        &self,
        configuration: Configuration,
        (command, built): &(BuildCommand, bool),
        collector: &Collector,
    ) -> Result<ResultRecord> {
        let samples = if *built || !self.config.skip_failed_builds {
            let run = RunCommand::new(&command.artifact, &configuration);
            collector.collect(self.runner, &run)?
        } else {
            vec![Sample::Failed; collector.trials()]
        };
        Ok(ResultRecord::aggregate(configuration, collector.parser().layout(), samples))
    }

    /// Black-box tuning of every variant on every configured device.
    ///
    /// Each evaluation is appended to the variant's samples log as soon as
    /// it is measured.
    pub fn tune(&self, variants: &[Variant], optimizer: &dyn Optimizer) -> Result<Vec<TuneResult>> {
        let tune = &self.config.tune;
        let mut results = Vec::new();
        for &device in &self.config.devices {
            for variant in variants {
                let space = self.search_space(variant, device)?;
                let problem = tune.problem_for(device);
                let cost = CostFunction::new(
                    self.toolchain,
                    self.runner,
                    &self.config.toolchain,
                    variant.clone(),
                    device,
                    problem,
                )
                .with_trials(tune.trials)
                .with_limit_ms(tune.limit_ms)
                .with_parser(self.config.tune_parser())
                .with_naming(self.config.artifact_naming)
                .with_skip_failed_builds(self.config.skip_failed_builds);

                let path = tune
                    .samples_dir_for(device)
                    .join(samples_file_name(variant, device));
                let mut log = SampleLog::create(&path, &space.parameter_names())?;
                info!(
                    variant = %variant,
                    device = %device,
                    optimizer = optimizer.name(),
                    problem = %problem.label(),
                    "tuning"
                );

                let mut objective = |point: &ParamPoint| -> Result<f64> {
                    let time = cost.evaluate(point)?;
                    log.record(point, time)?;
                    Ok(time)
                };
                let outcome = optimizer.optimize(&space, &mut objective)?;
                let best = outcome.best().cloned();
                if let Some(best) = &best {
                    info!(variant = %variant, device = %device, cost = best.cost, point = ?best.point, "best configuration");
                }
                results.push(TuneResult {
                    variant: variant.clone(),
                    device,
                    samples: path,
                    evaluations: outcome.evaluations.len(),
                    best,
                });
            }
        }
        Ok(results)
    }

    fn search_space(&self, variant: &Variant, device: Device) -> Result<SearchSpace> {
        match self.config.tune.space_file(variant, device) {
            Some(path) if path.is_file() => SearchSpace::load_from_file(&path),
            _ => Ok(SearchSpace::for_variant(variant, device, &self.config.tune.space)),
        }
    }

    /// Rebuilds each variant with its best tuned constants and measures it
    /// at every re-run size of the device.
    ///
    /// Variants without a samples log, or with an empty one, are skipped.
    pub fn rerun(&self, variants: &[Variant]) -> Result<Vec<ResultRecord>> {
        let collector = self.collector(self.config.trials);
        let schema = TableSchema::new(self.config.layout, collector.trials());
        let mut records = Vec::new();

        for &device in &self.config.devices {
            for variant in variants {
                let samples = self
                    .config
                    .tune
                    .samples_dir_for(device)
                    .join(samples_file_name(variant, device));
                if !samples.is_file() {
                    warn!(variant = %variant, device = %device, path = %samples.display(), "no samples log, skipping");
                    continue;
                }
                let Some(best) = best_sample(&samples)? else {
                    warn!(variant = %variant, device = %device, "samples log is empty, skipping");
                    continue;
                };
                let params = tuning_params(variant, &best.point)
                    .with_context(|| format!("best sample in {} does not fit {variant}", samples.display()))?;

                let build = KernelBuild::new(device, variant.clone(), params);
                let built = self.build(&build, self.config.artifact_naming);
                let path = TableNaming::PerVariant.path(&self.config.rerun.output_dir, "", &build);
                let mut table = ResultTable::create(&path, schema)?;

                for &problem in self.config.rerun.problems_for(device) {
                    let record = self.measure(Configuration::new(build.clone(), problem), &built, &collector)?;
                    info!(
                        variant = %variant,
                        device = %device,
                        problem = %problem.label(),
                        avg_ms = ?record.mean_total_ms(),
                        "measured"
                    );
                    table.write(&record)?;
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    /// Times each selected baseline at every sweep problem size, one table
    /// per baseline. Each baseline is parsed and tabulated with its own
    /// layout. Baselines for devices outside the configuration are skipped.
    pub fn run_baselines(&self, names: &[String]) -> Result<Vec<ResultRecord>> {
        let config = self.config;
        let mut records = Vec::new();
        for baseline in select_baselines(&config.baselines, names)? {
            if !config.devices.contains(&baseline.device) {
                info!(baseline = %baseline.name, device = %baseline.device, "device not selected, skipping");
                continue;
            }
            info!(baseline = %baseline.name, device = %baseline.device, "timing baseline");
            let built = self.compile(baseline.build_command(&config.toolchain));
            let collector = Collector::new(config.trials, config.parser_for(baseline.layout));
            let schema = TableSchema::new(baseline.layout, collector.trials());
            let path = baseline.table_path(&config.output_dir, &config.table_prefix);
            let mut table = ResultTable::create(&path, schema)?;

            for &problem in &config.problem_sizes {
                let configuration = Configuration::new(baseline.kernel_build(), problem);
                let record = self.measure(configuration, &built, &collector)?;
                info!(
                    baseline = %baseline.name,
                    problem = %problem.label(),
                    avg_ms = ?record.mean_total_ms(),
                    "measured"
                );
                table.write(&record)?;
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// The configured search strategy.
pub fn optimizer_for(config: &SweepConfig) -> Box<dyn Optimizer> {
    match config.tune.strategy {
        SearchStrategy::Grid => Box::new(GridSearch::new()),
        SearchStrategy::Random => Box::new(RandomSearch::new(config.tune.seed)),
    }
}

fn record_position(log: &mut Option<CheckpointLog>, next: Option<&SweepCursor>) {
    if let Some(writer) = log.as_mut() {
        if let Err(err) = writer.record(next) {
            warn!(error = %err, "failed to record sweep position");
        }
    }
}
