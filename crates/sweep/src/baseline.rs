//! Vendor-library reference kernels.
//!
//! Baselines are timed over the sweep's problem sizes so tuned variants can
//! be compared against them. They take no tuning constants and each one
//! carries its own compiler, flags and output layout.

use anyhow::{anyhow, Result};
use kernelsweep_autotune::sample::MetricLayout;
use kernelsweep_kernels::config::{Device, KernelBuild, TuningParams};
use kernelsweep_kernels::toolchain::{BuildCommand, ToolchainConfig};
use kernelsweep_kernels::variant::Variant;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Source stem: `<name>.cpp` builds the executable `<name>`.
    pub name: String,
    pub device: Device,
    pub compiler: String,
    #[serde(default)]
    pub flags: Vec<String>,
    /// Arguments placed after the output, e.g. `-lcublas`.
    #[serde(default)]
    pub libs: Vec<String>,
    pub layout: MetricLayout,
}

impl Baseline {
    /// cuBLAS GEMM; prints `total, kernel`.
    pub fn cublas() -> Self {
        Self {
            name: "mat_mul_cublas".to_string(),
            device: Device::Gpu,
            compiler: "nvcc".to_string(),
            flags: vec!["--gpu-architecture=compute_86".to_string()],
            libs: vec!["-lcublas".to_string()],
            layout: MetricLayout::TotalAndKernel,
        }
    }

    /// oneMKL GEMM; prints the total time only.
    pub fn mkl() -> Self {
        Self {
            name: "mat_mul_mkl".to_string(),
            device: Device::Cpu,
            compiler: "dpcpp".to_string(),
            flags: vec![
                "-DMKL_ILP64".to_string(),
                "-qmkl=parallel".to_string(),
                "-O3".to_string(),
            ],
            libs: Vec::new(),
            layout: MetricLayout::Total,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::cublas(), Self::mkl()]
    }

    /// The build a baseline's records are filed under.
    pub fn kernel_build(&self) -> KernelBuild {
        KernelBuild::new(self.device, Variant::new(self.name.as_str()), TuningParams::default())
    }

    pub fn build_command(&self, toolchain: &ToolchainConfig) -> BuildCommand {
        let source = toolchain.source_dir.join(format!("{}.cpp", self.name));
        let artifact = toolchain.artifact_dir.join(&self.name);
        BuildCommand::plain(&self.compiler, &self.flags, &source, &artifact, &self.libs)
    }

    /// `<dir>/<prefix>_<name>.csv`
    pub fn table_path(&self, dir: &Path, prefix: &str) -> PathBuf {
        dir.join(format!("{prefix}_{}.csv", self.name))
    }
}

/// Baselines named in `names`, or all of them when `names` is empty.
pub fn select_baselines<'a>(baselines: &'a [Baseline], names: &[String]) -> Result<Vec<&'a Baseline>> {
    if names.is_empty() {
        return Ok(baselines.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            baselines
                .iter()
                .find(|b| &b.name == name)
                .ok_or_else(|| anyhow!("unknown baseline `{name}`"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> ToolchainConfig {
        ToolchainConfig {
            source_dir: PathBuf::from("baseline"),
            artifact_dir: PathBuf::from("bin"),
            ..ToolchainConfig::default()
        }
    }

    #[test]
    fn default_build_commands() {
        let cublas = Baseline::cublas().build_command(&toolchain());
        assert_eq!(
            cublas.command_line(),
            "nvcc --gpu-architecture=compute_86 baseline/mat_mul_cublas.cpp -o bin/mat_mul_cublas -lcublas"
        );

        let mkl = Baseline::mkl().build_command(&toolchain());
        assert_eq!(
            mkl.command_line(),
            "dpcpp -DMKL_ILP64 -qmkl=parallel -O3 baseline/mat_mul_mkl.cpp -o bin/mat_mul_mkl"
        );
        assert!(!mkl.args.iter().any(|a| a.starts_with("-DSELECTOR")));
    }

    #[test]
    fn tables_and_builds_are_named_after_the_baseline() {
        let mkl = Baseline::mkl();
        assert_eq!(
            mkl.table_path(Path::new("tests"), "test"),
            PathBuf::from("tests/test_mat_mul_mkl.csv")
        );
        let build = mkl.kernel_build();
        assert_eq!(build.device, Device::Cpu);
        assert_eq!(build.params, TuningParams::default());
    }

    #[test]
    fn selection_by_name() {
        let all = Baseline::defaults();
        assert_eq!(select_baselines(&all, &[]).unwrap().len(), 2);
        let picked = select_baselines(&all, &["mat_mul_mkl".to_string()]).unwrap();
        assert_eq!(picked, vec![&all[1]]);
        assert!(select_baselines(&all, &["mat_mul_rocblas".to_string()]).is_err());
    }

    #[test]
    fn layout_round_trips_through_json() {
        let parsed: Baseline = serde_json::from_str(
            r#"{ "name": "gemm_ref", "device": "CPU", "compiler": "clang++", "layout": "total" }"#,
        )
        .unwrap();
        assert_eq!(parsed.layout, MetricLayout::Total);
        assert!(parsed.flags.is_empty() && parsed.libs.is_empty());
    }
}
