//! Parsing of raw kernel timing output into samples.
//!
//! A kernel prints either one number (total time), two comma-separated
//! numbers (total time, kernel time), or a line containing `Error`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker a kernel prints when its result check fails.
pub const ERROR_MARKER: &str = "Error";

/// How failed samples and missing means appear in result tables.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    Pair { total_ms: f64, kernel_ms: f64 },
    Single(f64),
    Failed,
}

impl Sample {
    pub fn total_ms(&self) -> Option<f64> {
        match *self {
            Sample::Pair { total_ms, .. } => Some(total_ms),
            Sample::Single(total_ms) => Some(total_ms),
            Sample::Failed => None,
        }
    }

    pub fn kernel_ms(&self) -> Option<f64> {
        match *self {
            Sample::Pair { kernel_ms, .. } => Some(kernel_ms),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Sample::Failed)
    }

    /// Drops the kernel time when the layout only tracks totals.
    pub fn project(self, layout: MetricLayout) -> Self {
        match (self, layout) {
            (Sample::Pair { total_ms, .. }, MetricLayout::Total) => Sample::Single(total_ms),
            (sample, _) => sample,
        }
    }
}

/// Metrics a kernel executable reports per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricLayout {
    Total,
    #[default]
    TotalAndKernel,
}

impl MetricLayout {
    pub fn arity(&self) -> usize {
        match self {
            MetricLayout::Total => 1,
            MetricLayout::TotalAndKernel => 2,
        }
    }

    pub fn has_kernel(&self) -> bool {
        matches!(self, MetricLayout::TotalAndKernel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("malformed kernel output `{raw}`")]
    Malformed { raw: String },
    #[error("kernel output `{raw}` has {found} metric(s), expected {expected}")]
    Layout {
        raw: String,
        found: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleParser {
    layout: MetricLayout,
    strict: bool,
}

impl SampleParser {
    /// Unparseable output becomes [`Sample::Failed`].
    pub fn lenient(layout: MetricLayout) -> Self {
        Self {
            layout,
            strict: false,
        }
    }

    /// Unparseable output, or output with the wrong number of metrics, is an error.
    /// Explicit failures (`Error`, empty output) are still samples.
    pub fn strict(layout: MetricLayout) -> Self {
        Self {
            layout,
            strict: true,
        }
    }

    pub fn layout(&self) -> MetricLayout {
        self.layout
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn parse(&self, raw: &str) -> Result<Sample, SampleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains(ERROR_MARKER) || trimmed == NOT_AVAILABLE {
            return Ok(Sample::Failed);
        }

        let values: Option<Vec<f64>> = trimmed.split(',').map(parse_time).collect();
        let sample = match values.as_deref() {
            Some([total]) => Sample::Single(*total),
            Some([total, kernel]) => Sample::Pair {
                total_ms: *total,
                kernel_ms: *kernel,
            },
            _ => return self.reject(SampleError::Malformed { raw: trimmed.to_string() }),
        };

        let found = if sample.kernel_ms().is_some() { 2 } else { 1 };
        if self.strict && found != self.layout.arity() {
            return Err(SampleError::Layout {
                raw: trimmed.to_string(),
                found,
                expected: self.layout.arity(),
            });
        }
        Ok(sample.project(self.layout))
    }

    fn reject(&self, err: SampleError) -> Result<Sample, SampleError> {
        if self.strict {
            Err(err)
        } else {
            Ok(Sample::Failed)
        }
    }
}

fn parse_time(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}
