//! Sweep configuration loaded from JSON.
//!
//! Every field has a default, so an empty `{}` file (or no file at all)
//! reproduces the reference campaign.

use crate::baseline::Baseline;
use anyhow::{Context, Result};
use kernelsweep_autotune::sample::{MetricLayout, SampleParser};
use kernelsweep_autotune::space::{InnerAxis, SweepSpace};
use kernelsweep_autotune::table::TableNaming;
use kernelsweep_autotune::topk::ReportFilter;
use kernelsweep_kernels::config::{Device, MatmulProblem};
use kernelsweep_kernels::registry::{VariantRegistry, DEFAULT_MATMUL_VARIANTS};
use kernelsweep_kernels::toolchain::{ArtifactNaming, ToolchainConfig};
use kernelsweep_kernels::variant::Variant;
use kernelsweep_optimizer::space::SpaceDefaults;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Variant catalog; `select` narrows it per run.
    pub variants: Vec<String>,
    /// Visit order of devices.
    pub devices: Vec<Device>,
    pub problem_sizes: Vec<MatmulProblem>,
    pub tile_sizes: Vec<u32>,
    pub unroll_steps: Vec<u32>,
    pub coarse_factors: Vec<u32>,
    pub trials: usize,
    pub layout: MetricLayout,
    /// Fail on kernel output that does not match `layout`.
    pub strict_parsing: bool,
    /// Kill a trial that runs longer than this.
    pub timeout_secs: Option<f64>,
    /// Record every trial of a failed build as failed instead of running
    /// whatever executable is left on disk.
    pub skip_failed_builds: bool,
    pub output_dir: PathBuf,
    pub table_prefix: String,
    pub table_naming: TableNaming,
    pub artifact_naming: ArtifactNaming,
    pub checkpoint: PathBuf,
    pub toolchain: ToolchainConfig,
    pub tune: TuneConfig,
    pub rerun: RerunConfig,
    pub report: ReportConfig,
    /// Vendor-library kernels timed over `problem_sizes`.
    pub baselines: Vec<Baseline>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            variants: DEFAULT_MATMUL_VARIANTS.iter().map(|v| v.to_string()).collect(),
            devices: vec![Device::Gpu, Device::Cpu],
            problem_sizes: [1024, 2048, 4096, 8192]
                .into_iter()
                .map(MatmulProblem::square)
                .collect(),
            tile_sizes: vec![4, 8, 16, 32],
            unroll_steps: vec![0, 1, 4, 8, 16, 32, 64],
            coarse_factors: vec![2, 4, 8],
            trials: 5,
            layout: MetricLayout::TotalAndKernel,
            strict_parsing: false,
            timeout_secs: None,
            skip_failed_builds: true,
            output_dir: PathBuf::from("tests"),
            table_prefix: "test".to_string(),
            table_naming: TableNaming::PerConfiguration,
            artifact_naming: ArtifactNaming::InPlace,
            checkpoint: PathBuf::from("log.txt"),
            toolchain: ToolchainConfig::default(),
            tune: TuneConfig::default(),
            rerun: RerunConfig::default(),
            report: ReportConfig::default(),
            baselines: Baseline::defaults(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    Grid,
    #[default]
    Random,
}

/// Black-box tuning of one variant at one problem size per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    pub sizes: BTreeMap<Device, MatmulProblem>,
    pub trials: usize,
    /// Per-trial time above which remaining trials are extrapolated.
    pub limit_ms: Option<f64>,
    pub strategy: SearchStrategy,
    pub seed: u64,
    pub space: SpaceDefaults,
    /// `<device>/<variant>.json` files here replace the generated space.
    pub space_dir: Option<PathBuf>,
    /// Samples logs go to `<samples_dir>/<device>/samples/`.
    pub samples_dir: PathBuf,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            sizes: BTreeMap::from([
                (Device::Cpu, MatmulProblem::square(4096)),
                (Device::Gpu, MatmulProblem::square(8192)),
            ]),
            trials: 5,
            limit_ms: Some(4000.0),
            strategy: SearchStrategy::Random,
            seed: 0x5eed,
            space: SpaceDefaults::default(),
            space_dir: None,
            samples_dir: PathBuf::from("tests"),
        }
    }
}

impl TuneConfig {
    pub fn problem_for(&self, device: Device) -> MatmulProblem {
        self.sizes
            .get(&device)
            .copied()
            .unwrap_or_else(|| MatmulProblem::square(4096))
    }

    pub fn samples_dir_for(&self, device: Device) -> PathBuf {
        self.samples_dir.join(device.name()).join("samples")
    }

    pub fn space_file(&self, variant: &Variant, device: Device) -> Option<PathBuf> {
        self.space_dir
            .as_ref()
            .map(|dir| dir.join(device.name()).join(format!("{variant}.json")))
    }
}

/// Re-run of the best tuned configuration of each variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerunConfig {
    pub sizes: BTreeMap<Device, Vec<MatmulProblem>>,
    /// Tables go to `<output_dir>/<device>/<variant>.csv`.
    pub output_dir: PathBuf,
}

impl Default for RerunConfig {
    fn default() -> Self {
        let squares = |sizes: &[usize]| -> Vec<MatmulProblem> {
            sizes.iter().copied().map(MatmulProblem::square).collect()
        };
        Self {
            sizes: BTreeMap::from([
                (Device::Cpu, squares(&[1024, 2048, 4096])),
                (Device::Gpu, squares(&[1024, 2048, 4096, 8192])),
            ]),
            output_dir: PathBuf::from("tests/times"),
        }
    }
}

impl RerunConfig {
    pub fn problems_for(&self, device: Device) -> &[MatmulProblem] {
        self.sizes.get(&device).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top_k: usize,
    pub filter: ReportFilter,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            filter: ReportFilter::default(),
        }
    }
}

impl SweepConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read sweep config {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("invalid sweep config {}", path.display()))
    }

    /// Loads `path` if given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("failed to write sweep config {}", path.display()))
    }

    pub fn registry(&self) -> VariantRegistry {
        VariantRegistry::from_names(&self.variants)
    }

    /// Catalog variants named in `names`, or all of them when `names` is empty.
    pub fn select_variants(&self, names: &[String]) -> Result<Vec<Variant>> {
        self.registry().select(names)
    }

    pub fn sweep_space(&self, variants: Vec<Variant>) -> SweepSpace {
        SweepSpace::new(self.devices.clone(), self.tile_sizes.clone(), variants)
            .with_inner_axis(InnerAxis::unroll_steps(self.unroll_steps.clone()))
            .with_inner_axis(InnerAxis::coarse_factors(self.coarse_factors.clone()))
            .with_problems(self.problem_sizes.clone())
    }

    pub fn parser(&self) -> SampleParser {
        self.parser_for(self.layout)
    }

    /// Test-mode builds print only the total time.
    pub fn tune_parser(&self) -> SampleParser {
        self.parser_for(MetricLayout::Total)
    }

    pub fn parser_for(&self, layout: MetricLayout) -> SampleParser {
        if self.strict_parsing {
            SampleParser::strict(layout)
        } else {
            SampleParser::lenient(layout)
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_reference_defaults() {
        let config: SweepConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.devices, vec![Device::Gpu, Device::Cpu]);
        assert_eq!(config.variants.len(), 8);
        assert_eq!(config.trials, 5);
        assert_eq!(config.tune.limit_ms, Some(4000.0));
        assert_eq!(config.tune.problem_for(Device::Gpu), MatmulProblem::square(8192));
        assert_eq!(config.rerun.problems_for(Device::Cpu).len(), 3);
        assert_eq!(config.report.top_k, 10);
        assert_eq!(config.toolchain.compiler, "syclcc");
        assert_eq!(config.baselines, Baseline::defaults());
    }

    #[test]
    fn partial_overrides_keep_other_defaults() {
        let config: SweepConfig = serde_json::from_str(
            r#"{
                "devices": ["CPU"],
                "trials": 2,
                "strict_parsing": true,
                "tune": { "strategy": "grid" },
                "toolchain": { "gpu_target": "cuda:sm_90" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.devices, vec![Device::Cpu]);
        assert_eq!(config.trials, 2);
        assert!(config.parser().is_strict());
        assert_eq!(config.tune_parser().layout(), MetricLayout::Total);
        assert_eq!(config.tune.strategy, SearchStrategy::Grid);
        assert_eq!(config.tune.trials, 5);
        assert_eq!(config.toolchain.gpu_target, "cuda:sm_90");
        assert_eq!(config.toolchain.cpu_target, "omp");
    }

    #[test]
    fn sweep_space_uses_configured_axes() {
        let config = SweepConfig {
            tile_sizes: vec![8],
            unroll_steps: vec![0, 4],
            coarse_factors: vec![2],
            devices: vec![Device::Cpu],
            ..SweepConfig::default()
        };
        let variants = config
            .select_variants(&["mat_mul_naive".to_string(), "mat_mul_naive_wt_unroll".to_string()])
            .unwrap();
        let space = config.sweep_space(variants);
        assert_eq!(space.len(), 1 + 2);
        assert_eq!(space.problems().len(), 4);
        assert!(config.select_variants(&["mat_mul_nope".to_string()]).is_err());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.json");
        let config = SweepConfig {
            timeout_secs: Some(30.0),
            ..SweepConfig::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = SweepConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(30)));
        assert!(SweepConfig::load_from_file(&dir.path().join("missing.json")).is_err());
    }
}
