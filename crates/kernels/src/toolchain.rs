//! Build and run command surfaces for kernel executables.
//!
//! Commands are plain data: the same [`KernelBuild`] always yields the same
//! [`BuildCommand`], and the same [`Configuration`] the same [`RunCommand`].
//! Executing them is left to [`Toolchain`] and [`TrialRunner`]
//! implementations.

use crate::config::{BlockSize, CoarseFactor, Configuration, Device, KernelBuild};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub compiler: String,
    pub opt_flags: Vec<String>,
    pub source_dir: PathBuf,
    pub artifact_dir: PathBuf,
    /// Environment variable the compiler reads to pick its backend.
    pub target_env: String,
    pub cpu_target: String,
    pub gpu_target: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "syclcc".to_string(),
            opt_flags: vec!["-O3".to_string()],
            source_dir: PathBuf::from("."),
            artifact_dir: PathBuf::from("."),
            target_env: "HIPSYCL_TARGETS".to_string(),
            cpu_target: "omp".to_string(),
            gpu_target: "cuda:sm_86".to_string(),
        }
    }
}

impl ToolchainConfig {
    pub fn target_for(&self, device: Device) -> &str {
        match device {
            Device::Cpu => &self.cpu_target,
            Device::Gpu => &self.gpu_target,
        }
    }
}

/// How compiled executables are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactNaming {
    /// `<variant>.out`, rebuilt in place for every configuration.
    #[default]
    InPlace,
    /// `<variant>_<device>_<params>.out`, one executable per configuration.
    PerConfiguration,
}

impl ArtifactNaming {
    pub fn file_name(&self, build: &KernelBuild) -> String {
        match self {
            ArtifactNaming::InPlace => format!("{}.out", build.variant),
            ArtifactNaming::PerConfiguration => {
                let suffix = build.params.suffix();
                if suffix.is_empty() {
                    format!("{}_{}.out", build.variant, build.device)
                } else {
                    format!("{}_{}_{}.out", build.variant, build.device, suffix)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub artifact: PathBuf,
}

impl BuildCommand {
    /// Translates one build into a toolchain invocation.
    ///
    /// `test_mode` adds `-DTEST`, which makes the kernel print only its total
    /// time. An unroll step of `0` emits no `UNROLL_STEP_SIZE` flag.
    pub fn new(
        config: &ToolchainConfig,
        build: &KernelBuild,
        naming: ArtifactNaming,
        test_mode: bool,
    ) -> Self {
        let source = config.source_dir.join(build.variant.source_file());
        let artifact = config.artifact_dir.join(naming.file_name(build));

        let mut args = config.opt_flags.clone();
        args.push(path_arg(&source));
        args.push("-o".to_string());
        args.push(path_arg(&artifact));
        if test_mode {
            args.push("-DTEST".to_string());
        }
        args.push(format!("-DSELECTOR={}", build.device.selector()));

        let params = &build.params;
        if let Some(tile) = params.tile_size {
            args.push(format!("-DTILE_SIZE={tile}"));
        }
        if let Some(BlockSize { x, y }) = params.block_size {
            args.push(format!("-DBLOCK_SIZE_X={x}"));
            args.push(format!("-DBLOCK_SIZE_Y={y}"));
        }
        match params.unroll_step {
            Some(0) | None => {}
            Some(step) => args.push(format!("-DUNROLL_STEP_SIZE={step}")),
        }
        match params.coarse_factor {
            Some(CoarseFactor::Uniform(f)) => args.push(format!("-DC_FACTOR={f}")),
            Some(CoarseFactor::PerAxis { x, y }) => {
                args.push(format!("-DC_FACTOR_X={x}"));
                args.push(format!("-DC_FACTOR_Y={y}"));
            }
            None => {}
        }

        Self {
            program: config.compiler.clone(),
            args,
            env: vec![(
                config.target_env.clone(),
                config.target_for(build.device).to_string(),
            )],
            artifact,
        }
    }

    /// Build of a source that takes no tuning constants, such as a vendor
    /// library reference kernel: `<flags> <source> -o <artifact> <libs>`.
    pub fn plain(
        program: impl Into<String>,
        flags: &[String],
        source: &Path,
        artifact: &Path,
        libs: &[String],
    ) -> Self {
        let mut args = flags.to_vec();
        args.push(path_arg(source));
        args.push("-o".to_string());
        args.push(path_arg(artifact));
        args.extend(libs.iter().cloned());
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            artifact: artifact.to_path_buf(),
        }
    }

    /// Shell-like rendering for logs, e.g. `HIPSYCL_TARGETS=omp syclcc -O3 ...`.
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("{key}={value} "));
        }
        line.push_str(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub program: PathBuf,
    pub args: [String; 3],
}

impl RunCommand {
    pub fn new(artifact: impl Into<PathBuf>, config: &Configuration) -> Self {
        Self {
            program: artifact.into(),
            args: config.problem.args(),
        }
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStatus {
    pub exit_code: Option<i32>,
    pub artifact_present: bool,
}

impl BuildStatus {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.artifact_present
    }
}

/// Compiles kernel sources into executables. Blocks until the build exits.
pub trait Toolchain {
    fn build(&self, command: &BuildCommand) -> Result<BuildStatus>;
}

/// Runs one trial of a compiled kernel and returns its captured stdout.
pub trait TrialRunner {
    fn run(&self, command: &RunCommand) -> Result<String>;
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
