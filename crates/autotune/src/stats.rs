//! Reduction of trial samples into result records.

use crate::sample::{MetricLayout, Sample};
use kernelsweep_kernels::config::Configuration;
use serde::{Deserialize, Serialize};

/// Mean and population standard deviation of one metric.
///
/// A `None` mean is the "N/A" sentinel: no trial produced a number.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

impl MetricSummary {
    /// Summarizes one metric across trials; `None` entries are failed trials.
    ///
    /// The deviation is only reported when every trial produced a value.
    pub fn from_trials(values: &[Option<f64>]) -> Self {
        let numeric: Vec<f64> = values.iter().flatten().copied().collect();
        let complete = !values.is_empty() && numeric.len() == values.len();
        Self {
            mean: mean(&numeric),
            std_dev: if complete {
                population_std_dev(&numeric)
            } else {
                None
            },
        }
    }
}

/// Arithmetic mean, shifted by the first value so that a constant sequence
/// returns that constant exactly.
pub fn mean(values: &[f64]) -> Option<f64> {
    let (&first, _) = values.split_first()?;
    let shifted: f64 = values.iter().map(|v| v - first).sum();
    Some(first + shifted / values.len() as f64)
}

/// `sqrt(1/n * Σ (x - mean)²)`.
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// One configuration with its raw samples and derived statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub config: Configuration,
    pub layout: MetricLayout,
    pub samples: Vec<Sample>,
    pub total: MetricSummary,
    /// Present only when the layout reports kernel time.
    pub kernel: Option<MetricSummary>,
}

impl ResultRecord {
    pub fn aggregate(config: Configuration, layout: MetricLayout, samples: Vec<Sample>) -> Self {
        let samples: Vec<Sample> = samples.into_iter().map(|s| s.project(layout)).collect();
        let totals: Vec<Option<f64>> = samples.iter().map(Sample::total_ms).collect();
        let kernel = layout.has_kernel().then(|| {
            let kernels: Vec<Option<f64>> = samples.iter().map(Sample::kernel_ms).collect();
            MetricSummary::from_trials(&kernels)
        });

        Self {
            config,
            layout,
            total: MetricSummary::from_trials(&totals),
            kernel,
            samples,
        }
    }

    pub fn mean_total_ms(&self) -> Option<f64> {
        self.total.mean
    }

    pub fn mean_kernel_ms(&self) -> Option<f64> {
        self.kernel.and_then(|k| k.mean)
    }

    /// At least one trial produced a usable time.
    pub fn is_valid(&self) -> bool {
        self.total.mean.is_some()
    }

    pub fn failed_trials(&self) -> usize {
        self.samples.iter().filter(|s| s.is_failed()).count()
    }
}
