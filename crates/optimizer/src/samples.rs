//! Output-samples log of a search and best-sample selection.

use crate::space::OBJECTIVE;
use anyhow::{anyhow, bail, Context, Result};
use kernelsweep_autotune::tuner::ParamPoint;
use kernelsweep_kernels::config::Device;
use kernelsweep_kernels::variant::Variant;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

/// Columns written by some external optimizers that carry no parameter.
const IGNORED_COLUMNS: [&str; 2] = ["Timestamp", "Valid"];

/// `<variant>_<device>_output_samples.csv`
pub fn samples_file_name(variant: &Variant, device: Device) -> String {
    format!("{variant}_{device}_output_samples.csv")
}

/// One CSV row per evaluated point: parameter columns, then `Time`.
pub struct SampleLog {
    path: PathBuf,
    names: Vec<String>,
    writer: csv::Writer<File>,
}

impl SampleLog {
    pub fn create(path: impl AsRef<Path>, names: &[&str]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create samples log {}", path.display()))?;
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        writer
            .write_record(names.iter().map(String::as_str).chain([OBJECTIVE]))
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .with_context(|| format!("failed to write samples log {}", path.display()))?;
        info!(path = %path.display(), "created samples log");
        Ok(Self {
            path,
            names,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, point: &ParamPoint, time: f64) -> Result<()> {
        let mut row = Vec::with_capacity(self.names.len() + 1);
        for name in &self.names {
            let value = point
                .get(name)
                .ok_or_else(|| anyhow!("sample is missing parameter `{name}`"))?;
            row.push(value.to_string());
        }
        row.push(time.to_string());
        self.writer
            .write_record(&row)
            .and_then(|_| self.writer.flush().map_err(csv::Error::from))
            .with_context(|| format!("failed to write samples log {}", self.path.display()))
    }
}

/// The row with the lowest `Time`; the first such row on ties.
#[derive(Debug, Clone, PartialEq)]
pub struct BestSample {
    pub point: ParamPoint,
    pub time: f64,
}

pub fn best_sample(path: impl AsRef<Path>) -> Result<Option<BestSample>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open samples log {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let Some(time_column) = headers.iter().position(|h| h == OBJECTIVE) else {
        bail!("samples log {} has no `{OBJECTIVE}` column", path.display());
    };

    let mut best: Option<BestSample> = None;
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("failed to read {} row {}", path.display(), line + 2))?;
        let time: f64 = row
            .get(time_column)
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("invalid time in {} row {}", path.display(), line + 2))?;
        if best.as_ref().is_some_and(|b| b.time <= time) {
            continue;
        }

        let mut point = ParamPoint::new();
        for (column, header) in headers.iter().enumerate() {
            if column == time_column || IGNORED_COLUMNS.contains(&header) {
                continue;
            }
            let cell = row.get(column).unwrap_or_default();
            point.insert(header.to_string(), parse_integer(cell).with_context(|| {
                format!("invalid `{header}` in {} row {}", path.display(), line + 2)
            })?);
        }
        best = Some(BestSample { point, time });
    }
    Ok(best)
}

/// Integers, also when written as integral floats such as `16.0`.
fn parse_integer(cell: &str) -> Result<i64> {
    let cell = cell.trim();
    if let Ok(value) = cell.parse::<i64>() {
        return Ok(value);
    }
    let value: f64 = cell
        .parse()
        .map_err(|_| anyhow!("`{cell}` is not a number"))?;
    if value.fract() != 0.0 || !value.is_finite() {
        bail!("`{cell}` is not an integer");
    }
    Ok(value as i64)
}
