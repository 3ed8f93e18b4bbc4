//! Ranking of finished result tables.
//!
//! Every table under a directory is read back and its records are offered
//! to a per-device [`Leaderboard`]. The report is serializable so it can be
//! diffed between campaigns.

use crate::config::ReportConfig;
use anyhow::{Context, Result};
use kernelsweep_autotune::table::read_records;
use kernelsweep_autotune::topk::{Leaderboard, RankedEntry};
use kernelsweep_kernels::config::Device;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub tables: usize,
    pub records: usize,
    pub best: BTreeMap<Device, Vec<RankedEntry>>,
}

impl RankingReport {
    pub fn from_leaderboard(board: &Leaderboard, tables: usize, records: usize) -> Self {
        Self {
            tables,
            records,
            best: board
                .devices()
                .map(|(device, top)| (device, top.entries().to_vec()))
                .collect(),
        }
    }

    /// Human-readable listing, one `<id>, time: <ms>` line per entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (device, entries) in &self.best {
            out.push_str(&format!("{device}:\n"));
            for entry in entries {
                out.push_str(&format!("{}, time: {}\n", entry.id, entry.time_ms));
            }
        }
        out
    }
}

/// Ranks every result table found below `dir`.
///
/// CSV files that are not result tables (samples logs, foreign files) are
/// skipped with a warning.
pub fn analyze(dir: &Path, config: &ReportConfig) -> Result<RankingReport> {
    let mut board = Leaderboard::new(config.top_k, config.filter.clone());
    let mut tables = 0;
    let mut records = 0;

    for path in csv_files(dir)? {
        let parsed = match read_records(&path) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "not a result table, skipping");
                continue;
            }
        };
        tables += 1;
        let id = path.display().to_string();
        for record in &parsed {
            records += 1;
            if board.offer_record(id.clone(), record) {
                debug!(id = %id, avg_ms = ?record.mean_total_ms(), "ranked");
            }
        }
    }
    Ok(RankingReport::from_leaderboard(&board, tables, records))
}

/// `*.csv` files below `dir`, sorted so ties rank deterministically.
fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .with_context(|| format!("failed to list {}", current.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list {}", current.display()))?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "csv") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernelsweep_autotune::sample::{MetricLayout, Sample};
    use kernelsweep_autotune::stats::ResultRecord;
    use kernelsweep_autotune::table::{ResultTable, TableSchema};
    use kernelsweep_autotune::topk::ReportFilter;
    use kernelsweep_kernels::config::{Configuration, KernelBuild, MatmulProblem, TuningParams};
    use kernelsweep_kernels::variant::Variant;

    fn write_table(path: &Path, device: Device, rows: &[(usize, f64)]) {
        let schema = TableSchema::new(MetricLayout::Total, 1);
        let mut table = ResultTable::create(path, schema).unwrap();
        for &(size, ms) in rows {
            let config = Configuration::new(
                KernelBuild::new(device, Variant::new("mat_mul_tiling"), TuningParams::default().with_tile_size(8)),
                MatmulProblem::square(size),
            );
            let record = ResultRecord::aggregate(config, MetricLayout::Total, vec![Sample::Single(ms)]);
            table.write(&record).unwrap();
        }
    }

    #[test]
    fn ranks_reference_sizes_per_device() {
        let dir = tempfile::tempdir().unwrap();
        write_table(&dir.path().join("GPU/a.csv"), Device::Gpu, &[(4096, 1.0), (8192, 30.0)]);
        write_table(&dir.path().join("GPU/b.csv"), Device::Gpu, &[(8192, 20.0)]);
        write_table(&dir.path().join("CPU/c.csv"), Device::Cpu, &[(4096, 90.0), (8192, 500.0)]);
        fs::write(dir.path().join("notes.csv"), "hello,world\n1,2\n").unwrap();

        let report = analyze(dir.path(), &ReportConfig::default()).unwrap();
        assert_eq!(report.tables, 3);
        assert_eq!(report.records, 5);

        let gpu: Vec<f64> = report.best[&Device::Gpu].iter().map(|e| e.time_ms).collect();
        assert_eq!(gpu, vec![20.0, 30.0]);
        assert!(report.best[&Device::Gpu][0].id.ends_with("b.csv"));
        assert_eq!(report.best[&Device::Cpu].len(), 1);
        assert!(report.render().contains("time: 90"));
    }

    #[test]
    fn capacity_bounds_each_device() {
        let dir = tempfile::tempdir().unwrap();
        for (i, ms) in [5.0, 3.0, 9.0, 1.0].into_iter().enumerate() {
            write_table(&dir.path().join(format!("t{i}.csv")), Device::Gpu, &[(1024, ms)]);
        }
        let config = ReportConfig {
            top_k: 2,
            filter: ReportFilter::any_size(),
        };
        let report = analyze(dir.path(), &config).unwrap();
        let times: Vec<f64> = report.best[&Device::Gpu].iter().map(|e| e.time_ms).collect();
        assert_eq!(times, vec![1.0, 3.0]);
    }
}
