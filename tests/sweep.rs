use anyhow::{anyhow, Result};
use kernelsweep::autotune::checkpoint::{load_checkpoint, Checkpoint};
use kernelsweep::autotune::space::SweepCursor;
use kernelsweep::autotune::table::read_records;
use kernelsweep::kernels::config::{Device, MatmulProblem};
use kernelsweep::kernels::toolchain::{
    ArtifactNaming, BuildCommand, BuildStatus, RunCommand, Toolchain, TrialRunner,
};
use kernelsweep::optimizer::optimizer::GridSearch;
use kernelsweep::optimizer::samples::best_sample;
use kernelsweep::sweep::config::SweepConfig;
use kernelsweep::sweep::report::analyze;
use kernelsweep::sweep::session::{SweepSession, SweepStart};
use std::cell::{Cell, RefCell};
use std::path::Path;

#[derive(Default)]
struct RecordingToolchain {
    builds: RefCell<Vec<BuildCommand>>,
    failing_variant: Option<&'static str>,
}

impl Toolchain for RecordingToolchain {
    fn build(&self, command: &BuildCommand) -> Result<BuildStatus> {
        self.builds.borrow_mut().push(command.clone());
        let fails = self
            .failing_variant
            .is_some_and(|v| command.args.iter().any(|a| a.ends_with(&format!("{v}.cpp"))));
        Ok(BuildStatus {
            exit_code: Some(if fails { 1 } else { 0 }),
            artifact_present: !fails,
        })
    }
}

struct ScriptedRunner<F> {
    output: F,
    calls: Cell<usize>,
}

impl<F: Fn(usize, &RunCommand) -> Result<String>> ScriptedRunner<F> {
    fn new(output: F) -> Self {
        Self {
            output,
            calls: Cell::new(0),
        }
    }
}

impl<F: Fn(usize, &RunCommand) -> Result<String>> TrialRunner for ScriptedRunner<F> {
    fn run(&self, command: &RunCommand) -> Result<String> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        (self.output)(call, command)
    }
}

fn small_config(dir: &Path) -> SweepConfig {
    SweepConfig {
        variants: vec!["mat_mul_naive".into(), "mat_mul_tiling_wt_unroll".into()],
        devices: vec![Device::Cpu],
        problem_sizes: vec![MatmulProblem::square(64), MatmulProblem::square(128)],
        tile_sizes: vec![8, 16],
        unroll_steps: vec![0, 4],
        coarse_factors: vec![2],
        trials: 2,
        output_dir: dir.join("tests"),
        checkpoint: dir.join("log.txt"),
        ..SweepConfig::default()
    }
}

fn run(
    config: &SweepConfig,
    toolchain: &RecordingToolchain,
    runner: &impl TrialRunner,
    start: SweepStart,
) -> Result<usize> {
    let session = SweepSession::new(config, toolchain, runner);
    let space = config.sweep_space(config.select_variants(&[])?);
    Ok(session.run_sweep(&space, start)?.steps)
}

#[test]
fn full_sweep_writes_one_table_per_build() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config(dir.path());
    let toolchain = RecordingToolchain::default();
    let runner = ScriptedRunner::new(|_, _| Ok("10, 4".to_string()));

    let session = SweepSession::new(&config, &toolchain, &runner);
    let space = config.sweep_space(config.select_variants(&[])?);
    let summary = session.run_sweep(&space, SweepStart::Fresh)?;

    assert_eq!(summary.steps, 6);
    assert_eq!(summary.records, 12);
    assert_eq!(summary.failed_trials, 0);
    assert_eq!(toolchain.builds.borrow().len(), 6);
    assert_eq!(runner.calls.get(), 12 * 2);

    let unrolled = config.output_dir.join("test_mat_mul_tiling_wt_unroll_CPU_16_0.csv");
    let records = read_records(&unrolled)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].config.problem, MatmulProblem::square(128));
    assert_eq!(records[0].mean_total_ms(), Some(10.0));
    assert_eq!(records[0].mean_kernel_ms(), Some(4.0));
    assert_eq!(records[0].total.std_dev, Some(0.0));

    assert_eq!(load_checkpoint(&config.checkpoint)?, Checkpoint::Complete);
    Ok(())
}

#[test]
fn interrupted_sweep_resumes_where_it_stopped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = SweepConfig {
        strict_parsing: true,
        ..small_config(dir.path())
    };

    // Two problems x two trials per step; the first trial of step 3 is garbage.
    let first_tool = RecordingToolchain::default();
    let broken = ScriptedRunner::new(|call, _| {
        Ok(if call == 9 { "segfault".to_string() } else { "10, 4".to_string() })
    });
    assert!(run(&config, &first_tool, &broken, SweepStart::Resume).is_err());
    assert_eq!(first_tool.builds.borrow().len(), 3);
    assert!(matches!(load_checkpoint(&config.checkpoint)?, Checkpoint::Resume(_)));

    let second_tool = RecordingToolchain::default();
    let healthy = ScriptedRunner::new(|_, _| Ok("10, 4".to_string()));
    assert_eq!(run(&config, &second_tool, &healthy, SweepStart::Resume)?, 4);
    assert_eq!(second_tool.builds.borrow()[0], first_tool.builds.borrow()[2]);
    assert_eq!(load_checkpoint(&config.checkpoint)?, Checkpoint::Complete);

    let third_tool = RecordingToolchain::default();
    assert_eq!(run(&config, &third_tool, &healthy, SweepStart::Resume)?, 0);
    assert!(third_tool.builds.borrow().is_empty());
    Ok(())
}

#[test]
fn explicit_start_overrides_the_log() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config(dir.path());
    let runner = ScriptedRunner::new(|_, _| Ok("1, 1".to_string()));
    run(&config, &RecordingToolchain::default(), &runner, SweepStart::Fresh)?;

    let toolchain = RecordingToolchain::default();
    let steps = run(&config, &toolchain, &runner, SweepStart::At(SweepCursor::new(0, 1, 0)))?;
    assert_eq!(steps, 3);
    let tile = "-DTILE_SIZE=16".to_string();
    assert!(toolchain.builds.borrow().iter().all(|b| b.args.contains(&tile)));
    Ok(())
}

#[test]
fn failed_builds_are_recorded_without_running() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = small_config(dir.path());
    let toolchain = RecordingToolchain {
        failing_variant: Some("mat_mul_naive"),
        ..RecordingToolchain::default()
    };
    let runner = ScriptedRunner::new(|_, command: &RunCommand| {
        if command.program.to_string_lossy().contains("naive") {
            Err(anyhow!("stale executable was run"))
        } else {
            Ok("10, 4".to_string())
        }
    });

    let session = SweepSession::new(&config, &toolchain, &runner);
    let space = config.sweep_space(config.select_variants(&[])?);
    let summary = session.run_sweep(&space, SweepStart::Fresh)?;
    assert_eq!(summary.failed_builds, 2);
    assert_eq!(summary.failed_trials, 2 * 2 * 2);
    assert_eq!(runner.calls.get(), 4 * 2 * 2);

    let naive = read_records(config.output_dir.join("test_mat_mul_naive_CPU_8.csv"))?;
    assert!(naive.iter().all(|r| !r.is_valid() && r.failed_trials() == 2));
    Ok(())
}

#[test]
fn tune_rerun_and_rank() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = small_config(dir.path());
    config.variants = vec!["mat_mul_tiling".into()];
    config.devices = vec![Device::Gpu];
    config.artifact_naming = ArtifactNaming::PerConfiguration;
    config.tune.samples_dir = dir.path().join("samples");
    config.tune.space.tile_sizes = vec![4, 8, 16, 32];
    config.rerun.output_dir = dir.path().join("times");
    config.report.filter.sizes.insert(Device::Gpu, MatmulProblem::square(1024));

    let toolchain = RecordingToolchain::default();
    let runner = ScriptedRunner::new(|_, command: &RunCommand| {
        let program = command.program.to_string_lossy();
        Ok(if program.contains("_t16") { "5, 2" } else { "20, 8" }.to_string())
    });
    let session = SweepSession::new(&config, &toolchain, &runner);
    let variants = config.select_variants(&[])?;

    let tuned = session.tune(&variants, &GridSearch::new())?;
    assert_eq!(tuned.len(), 1);
    assert_eq!(tuned[0].evaluations, 4);
    let best = tuned[0].best.as_ref().ok_or_else(|| anyhow!("no best point"))?;
    assert_eq!(best.point["tile_size"], 16);
    assert_eq!(best.cost, 5.0);
    assert!(toolchain.builds.borrow().iter().all(|b| b.args.contains(&"-DTEST".to_string())));

    let logged = best_sample(&tuned[0].samples)?.ok_or_else(|| anyhow!("empty samples log"))?;
    assert_eq!(logged.point["tile_size"], 16);

    let records = session.rerun(&variants)?;
    assert_eq!(records.len(), config.rerun.problems_for(Device::Gpu).len());
    assert!(records.iter().all(|r| r.config.build.params.tile_size == Some(16)));
    assert!(records.iter().all(|r| r.mean_total_ms() == Some(5.0)));
    assert!(config.rerun.output_dir.join("GPU/mat_mul_tiling.csv").is_file());

    let report = analyze(&config.rerun.output_dir, &config.report)?;
    assert_eq!(report.best[&Device::Gpu].len(), 1);
    assert_eq!(report.best[&Device::Gpu][0].time_ms, 5.0);
    Ok(())
}

#[test]
fn baselines_use_their_own_builds_and_layouts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = SweepConfig {
        strict_parsing: true,
        devices: vec![Device::Gpu, Device::Cpu],
        ..small_config(dir.path())
    };
    let toolchain = RecordingToolchain::default();
    let runner = ScriptedRunner::new(|_, command: &RunCommand| {
        let program = command.program.to_string_lossy();
        Ok(if program.contains("cublas") { "30, 25" } else { "40" }.to_string())
    });

    let session = SweepSession::new(&config, &toolchain, &runner);
    let records = session.run_baselines(&[])?;
    assert_eq!(records.len(), 2 * 2);
    assert_eq!(runner.calls.get(), 2 * 2 * 2);

    let builds = toolchain.builds.borrow();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].program, "nvcc");
    assert!(builds[0].args.contains(&"-lcublas".to_string()));
    assert!(builds.iter().all(|b| !b.args.iter().any(|a| a.starts_with("-DTILE_SIZE"))));

    let cublas = read_records(config.output_dir.join("test_mat_mul_cublas.csv"))?;
    assert_eq!(cublas.len(), 2);
    assert_eq!(cublas[0].mean_kernel_ms(), Some(25.0));
    let mkl = read_records(config.output_dir.join("test_mat_mul_mkl.csv"))?;
    assert_eq!(mkl[1].config.problem, MatmulProblem::square(128));
    assert_eq!(mkl[0].mean_total_ms(), Some(40.0));
    assert_eq!(mkl[0].mean_kernel_ms(), None);
    drop(builds);

    let cpu_only = SweepConfig {
        devices: vec![Device::Cpu],
        ..config.clone()
    };
    let toolchain = RecordingToolchain::default();
    let session = SweepSession::new(&cpu_only, &toolchain, &runner);
    assert_eq!(session.run_baselines(&[])?.len(), 2);
    assert_eq!(toolchain.builds.borrow()[0].program, "dpcpp");
    assert!(session.run_baselines(&["mat_mul_rocblas".to_string()]).is_err());
    Ok(())
}
