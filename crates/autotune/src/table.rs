//! CSV result tables consumed by the plotting and ranking tools.
//!
//! Column order is fixed: configuration columns, then `t1[, k1] .. tN[, kN]`,
//! then `Avg Time[, Avg Kernel Time]`, `Std Dev[, Kernel Std Dev]`. Missing
//! values are written as `N/A`, absent tuning constants as empty cells.

use crate::sample::{MetricLayout, Sample, NOT_AVAILABLE};
use crate::stats::{MetricSummary, ResultRecord};
use anyhow::{anyhow, bail, Context, Result};
use kernelsweep_kernels::config::{
    BlockSize, CoarseFactor, Configuration, Device, KernelBuild, MatmulProblem, TuningParams,
};
use kernelsweep_kernels::variant::Variant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_COLUMNS: [&str; 10] = [
    "Device",
    "Variant",
    "NxMxK",
    "tile_size",
    "block_size_x",
    "block_size_y",
    "unroll_step",
    "coarse_factor",
    "coarse_factor_x",
    "coarse_factor_y",
];
const AVG_TIME: &str = "Avg Time";
const AVG_KERNEL_TIME: &str = "Avg Kernel Time";
const STD_DEV: &str = "Std Dev";
const KERNEL_STD_DEV: &str = "Kernel Std Dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub layout: MetricLayout,
    pub trials: usize,
}

impl TableSchema {
    pub fn new(layout: MetricLayout, trials: usize) -> Self {
        Self { layout, trials }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = CONFIG_COLUMNS.iter().map(|c| c.to_string()).collect();
        for trial in 1..=self.trials {
            header.push(format!("t{trial}"));
            if self.layout.has_kernel() {
                header.push(format!("k{trial}"));
            }
        }
        header.push(AVG_TIME.to_string());
        if self.layout.has_kernel() {
            header.push(AVG_KERNEL_TIME.to_string());
        }
        header.push(STD_DEV.to_string());
        if self.layout.has_kernel() {
            header.push(KERNEL_STD_DEV.to_string());
        }
        header
    }

    /// Recovers the schema from a header row.
    pub fn from_header(header: &[String]) -> Result<Self> {
        let layout = if header.iter().any(|c| c == AVG_KERNEL_TIME) {
            MetricLayout::TotalAndKernel
        } else {
            MetricLayout::Total
        };
        let trials = header
            .iter()
            .filter(|c| c.strip_prefix('t').is_some_and(|n| n.parse::<usize>().is_ok()))
            .count();
        let schema = Self::new(layout, trials);
        if schema.header() != header {
            bail!("unrecognized result table header: {}", header.join(","));
        }
        Ok(schema)
    }

    fn row(&self, record: &ResultRecord) -> Vec<String> {
        let config = &record.config;
        let params = &config.build.params;
        let (coarse, coarse_x, coarse_y) = match params.coarse_factor {
            Some(CoarseFactor::Uniform(f)) => (Some(f), None, None),
            Some(CoarseFactor::PerAxis { x, y }) => (None, Some(x), Some(y)),
            None => (None, None, None),
        };

        let mut row = vec![
            config.build.device.name().to_string(),
            config.build.variant.name().to_string(),
            config.problem.label(),
            param_cell(params.tile_size),
            param_cell(params.block_size.map(|b| b.x)),
            param_cell(params.block_size.map(|b| b.y)),
            param_cell(params.unroll_step),
            param_cell(coarse),
            param_cell(coarse_x),
            param_cell(coarse_y),
        ];

        for trial in 0..self.trials {
            let sample = record.samples.get(trial).copied().unwrap_or(Sample::Failed);
            row.push(time_cell(sample.total_ms()));
            if self.layout.has_kernel() {
                row.push(time_cell(sample.kernel_ms()));
            }
        }

        let kernel = record.kernel.unwrap_or_default();
        row.push(time_cell(record.total.mean));
        if self.layout.has_kernel() {
            row.push(time_cell(kernel.mean));
        }
        row.push(time_cell(record.total.std_dev));
        if self.layout.has_kernel() {
            row.push(time_cell(kernel.std_dev));
        }
        row
    }
}

/// Append-only writer for one result table.
pub struct ResultTable {
    path: PathBuf,
    schema: TableSchema,
    writer: csv::Writer<File>,
}

impl ResultTable {
    /// Creates (or truncates) the table and writes its header.
    pub fn create(path: impl AsRef<Path>, schema: TableSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("failed to create result table {}", path.display()))?;
        let mut table = Self::from_file(path, schema, file);
        table.write_row(&schema.header())?;
        info!(path = %table.path.display(), "created result table");
        Ok(table)
    }

    /// Opens an existing table for appending, or creates it.
    ///
    /// An existing table must carry exactly the header of `schema`.
    pub fn append(path: impl AsRef<Path>, schema: TableSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existing = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);
        if !existing {
            return Self::create(path, schema);
        }

        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("failed to open result table {}", path.display()))?;
        let header: Vec<String> = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();
        if header != schema.header() {
            bail!(
                "result table {} has a different column layout; refusing to append",
                path.display()
            );
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open result table {}", path.display()))?;
        Ok(Self::from_file(path, schema, file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> TableSchema {
        self.schema
    }

    /// Writes one record and flushes it to disk.
    pub fn write(&mut self, record: &ResultRecord) -> Result<()> {
        let row = self.schema.row(record);
        self.write_row(&row)
    }

    fn from_file(path: PathBuf, schema: TableSchema, file: File) -> Self {
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        Self {
            path,
            schema,
            writer,
        }
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        self.writer
            .write_record(row)
            .with_context(|| format!("failed to write to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}

/// Reads every record of a result table.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open result table {}", path.display()))?;
    let header: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let schema = TableSchema::from_header(&header)
        .with_context(|| format!("in result table {}", path.display()))?;
    let columns: HashMap<&str, usize> = header
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("failed to read row {} of {}", line + 2, path.display()))?;
        let record = parse_row(&schema, &columns, &row)
            .with_context(|| format!("invalid row {} of {}", line + 2, path.display()))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_row(
    schema: &TableSchema,
    columns: &HashMap<&str, usize>,
    row: &csv::StringRecord,
) -> Result<ResultRecord> {
    let cell = |name: &str| -> Result<&str> {
        columns
            .get(name)
            .and_then(|&index| row.get(index))
            .ok_or_else(|| anyhow!("missing column `{name}`"))
    };

    let device: Device = cell("Device")?.parse()?;
    let variant = Variant::new(cell("Variant")?);
    let problem = MatmulProblem::parse_label(cell("NxMxK")?)?;

    let block_size = match (parse_param(cell("block_size_x")?)?, parse_param(cell("block_size_y")?)?) {
        (Some(x), Some(y)) => Some(BlockSize { x, y }),
        (None, None) => None,
        _ => bail!("block size needs both x and y"),
    };
    let coarse_factor = match (
        parse_param(cell("coarse_factor")?)?,
        parse_param(cell("coarse_factor_x")?)?,
        parse_param(cell("coarse_factor_y")?)?,
    ) {
        (Some(f), None, None) => Some(CoarseFactor::Uniform(f)),
        (None, Some(x), Some(y)) => Some(CoarseFactor::PerAxis { x, y }),
        (None, None, None) => None,
        _ => bail!("inconsistent coarsening columns"),
    };
    let params = TuningParams {
        tile_size: parse_param(cell("tile_size")?)?,
        block_size,
        unroll_step: parse_param(cell("unroll_step")?)?,
        coarse_factor,
    };

    let mut samples = Vec::with_capacity(schema.trials);
    for trial in 1..=schema.trials {
        let total = parse_time(cell(&format!("t{trial}"))?)?;
        let kernel = if schema.layout.has_kernel() {
            parse_time(cell(&format!("k{trial}"))?)?
        } else {
            None
        };
        samples.push(match (total, kernel) {
            (Some(total_ms), Some(kernel_ms)) => Sample::Pair { total_ms, kernel_ms },
            (Some(total_ms), None) => Sample::Single(total_ms),
            (None, _) => Sample::Failed,
        });
    }

    let total = MetricSummary {
        mean: parse_time(cell(AVG_TIME)?)?,
        std_dev: parse_time(cell(STD_DEV)?)?,
    };
    let kernel = if schema.layout.has_kernel() {
        Some(MetricSummary {
            mean: parse_time(cell(AVG_KERNEL_TIME)?)?,
            std_dev: parse_time(cell(KERNEL_STD_DEV)?)?,
        })
    } else {
        None
    };

    Ok(ResultRecord {
        config: Configuration::new(KernelBuild::new(device, variant, params), problem),
        layout: schema.layout,
        samples,
        total,
        kernel,
    })
}

/// Where result tables are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableNaming {
    /// `<prefix>_<variant>_<device>_<tile>[_<step>][_<coarse>].csv`, one table per build.
    #[default]
    PerConfiguration,
    /// `<device>/<variant>.csv`, one table per variant and device.
    PerVariant,
}

impl TableNaming {
    pub fn path(&self, dir: &Path, prefix: &str, build: &KernelBuild) -> PathBuf {
        match self {
            TableNaming::PerConfiguration => {
                let params = &build.params;
                let mut name = format!("{prefix}_{}_{}", build.variant, build.device);
                if let Some(tile) = params.tile_size {
                    name.push_str(&format!("_{tile}"));
                }
                if let Some(BlockSize { x, y }) = params.block_size {
                    name.push_str(&format!("_{x}x{y}"));
                }
                if let Some(step) = params.unroll_step {
                    name.push_str(&format!("_{step}"));
                }
                match params.coarse_factor {
                    Some(CoarseFactor::Uniform(f)) => name.push_str(&format!("_{f}")),
                    Some(CoarseFactor::PerAxis { x, y }) => name.push_str(&format!("_{x}x{y}")),
                    None => {}
                }
                dir.join(format!("{name}.csv"))
            }
            TableNaming::PerVariant => dir
                .join(build.device.name())
                .join(format!("{}.csv", build.variant)),
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn param_cell(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn time_cell(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NOT_AVAILABLE.to_string(),
    }
}

fn parse_param(cell: &str) -> Result<Option<u32>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse()
        .map(Some)
        .map_err(|err| anyhow!("invalid tuning constant `{cell}`: {err}"))
}

fn parse_time(cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell == NOT_AVAILABLE {
        return Ok(None);
    }
    cell.parse()
        .map(Some)
        .map_err(|err| anyhow!("invalid time `{cell}`: {err}"))
}
