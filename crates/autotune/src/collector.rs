//! Trial execution and sample collection for one configuration.

use crate::sample::{Sample, SampleParser};
use anyhow::Result;
use kernelsweep_kernels::toolchain::{RunCommand, TrialRunner};
use tracing::{debug, warn};

/// Cost reported for configurations that cannot be measured.
pub const MAX_COST: f64 = i64::MAX as f64;

/// Outcome of a cost-mode measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostMeasurement {
    pub cost: f64,
    pub trials_run: usize,
    /// A trial exceeded the limit and the remaining trials were extrapolated.
    pub early_exit: bool,
    pub failed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Collector {
    trials: usize,
    parser: SampleParser,
}

impl Collector {
    pub fn new(trials: usize, parser: SampleParser) -> Self {
        Self {
            trials: trials.max(1),
            parser,
        }
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn parser(&self) -> &SampleParser {
        &self.parser
    }

    /// Runs exactly `trials` sequential trials and returns one sample per trial.
    ///
    /// Strict parse errors abort the collection; runner errors are recorded
    /// as failed samples.
    pub fn collect<R>(&self, runner: &R, command: &RunCommand) -> Result<Vec<Sample>>
    where
        R: TrialRunner + ?Sized,
    {
        let mut samples = Vec::with_capacity(self.trials);
        for trial in 0..self.trials {
            let sample = self.run_trial(runner, command, trial)?;
            samples.push(sample);
        }
        Ok(samples)
    }

    /// Measures the mean total time used as a search cost.
    ///
    /// When a trial takes longer than `limit_ms`, the time accumulated so far
    /// is multiplied by the trial count and the remaining trials are skipped.
    /// The first failed trial ends the measurement with `MAX_COST / trials`.
    pub fn measure_cost<R>(
        &self,
        runner: &R,
        command: &RunCommand,
        limit_ms: Option<f64>,
    ) -> Result<CostMeasurement>
    where
        R: TrialRunner + ?Sized,
    {
        let trials = self.trials as f64;
        let mut time = 0.0;
        let mut early_exit = false;
        let mut trials_run = 0;

        for trial in 0..self.trials {
            trials_run += 1;
            match self.run_trial(runner, command, trial)?.total_ms() {
                Some(ms) => {
                    time += ms;
                    if limit_ms.is_some_and(|limit| ms > limit) {
                        debug!(trial, time_ms = ms, ?limit_ms, "trial over limit, extrapolating");
                        time *= trials;
                        early_exit = true;
                        break;
                    }
                }
                None => {
                    return Ok(CostMeasurement {
                        cost: MAX_COST / trials,
                        trials_run,
                        early_exit: false,
                        failed: true,
                    });
                }
            }
        }

        Ok(CostMeasurement {
            cost: time / trials,
            trials_run,
            early_exit,
            failed: false,
        })
    }

    fn run_trial<R>(&self, runner: &R, command: &RunCommand, trial: usize) -> Result<Sample>
    where
        R: TrialRunner + ?Sized,
    {
        debug!(trial, command = %command.command_line(), "running trial");
        let sample = match runner.run(command) {
            Ok(output) => self.parser.parse(&output)?,
            Err(err) => {
                warn!(trial, error = %err, "trial did not complete");
                Sample::Failed
            }
        };
        if sample.is_failed() {
            warn!(trial, command = %command.command_line(), "trial failed");
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MetricLayout;
    use anyhow::anyhow;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    struct ScriptedRunner {
        outputs: RefCell<VecDeque<Result<String>>>,
        calls: Cell<usize>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<Result<String>>) -> Self {
            Self {
                outputs: RefCell::new(outputs.into()),
                calls: Cell::new(0),
            }
        }

        fn ok(outputs: &[&str]) -> Self {
            Self::new(outputs.iter().map(|o| Ok(o.to_string())).collect())
        }
    }

    impl TrialRunner for ScriptedRunner {
        fn run(&self, _command: &RunCommand) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            self.outputs
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn command() -> RunCommand {
        RunCommand {
            program: "mat_mul_naive.out".into(),
            args: ["4096".to_string(), "4096".to_string(), "4096".to_string()],
        }
    }

    fn collector(trials: usize) -> Collector {
        Collector::new(trials, SampleParser::lenient(MetricLayout::Total))
    }

    #[test]
    fn collect_returns_one_sample_per_trial() {
        let runner = ScriptedRunner::new(vec![
            Ok("10".to_string()),
            Ok("Error: (0, 1): 3".to_string()),
            Err(anyhow!("timed out")),
            Ok("12".to_string()),
            Ok("garbage".to_string()),
        ]);
        let samples = collector(5).collect(&runner, &command()).unwrap();
        assert_eq!(samples.len(), 5);
        assert_eq!(runner.calls.get(), 5);
        assert_eq!(
            samples,
            vec![
                Sample::Single(10.0),
                Sample::Failed,
                Sample::Failed,
                Sample::Single(12.0),
                Sample::Failed
            ]
        );
    }

    #[test]
    fn strict_parse_error_aborts_collection() {
        let runner = ScriptedRunner::ok(&["10", "10 ms"]);
        let strict = Collector::new(3, SampleParser::strict(MetricLayout::Total));
        assert!(strict.collect(&runner, &command()).is_err());
        assert_eq!(runner.calls.get(), 2);
    }

    #[test]
    fn cost_is_mean_of_trials_within_limit() {
        let runner = ScriptedRunner::ok(&["100", "110", "90", "100", "100"]);
        let measured = collector(5).measure_cost(&runner, &command(), Some(4000.0)).unwrap();
        assert_eq!(measured.cost, 100.0);
        assert_eq!(measured.trials_run, 5);
        assert!(!measured.early_exit);
    }

    #[test]
    fn over_limit_trial_extrapolates_and_stops() {
        let runner = ScriptedRunner::ok(&["5000", "10", "10", "10", "10"]);
        let measured = collector(5).measure_cost(&runner, &command(), Some(4000.0)).unwrap();
        assert_eq!(measured.cost, 5000.0);
        assert_eq!(runner.calls.get(), 1);
        assert!(measured.early_exit);
    }

    #[test]
    fn extrapolation_includes_earlier_trials() {
        let runner = ScriptedRunner::ok(&["3000", "4500", "10"]);
        let measured = collector(5).measure_cost(&runner, &command(), Some(4000.0)).unwrap();
        assert_eq!(measured.cost, 7500.0);
        assert_eq!(runner.calls.get(), 2);
    }

    #[test]
    fn failed_trial_returns_penalty() {
        let runner = ScriptedRunner::ok(&["100", "Error: (1, 1): 0", "100"]);
        let measured = collector(5).measure_cost(&runner, &command(), None).unwrap();
        assert!(measured.failed);
        assert_eq!(measured.cost, MAX_COST / 5.0);
        assert_eq!(runner.calls.get(), 2);
    }
}
