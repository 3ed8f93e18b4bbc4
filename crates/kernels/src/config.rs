//! Kernel configuration structures.

use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Device {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "GPU")]
    Gpu,
}

impl Device {
    /// Value of the `SELECTOR` build constant.
    pub fn selector(&self) -> u8 {
        match self {
            Device::Cpu => 0,
            Device::Gpu => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Device::Cpu => "CPU",
            Device::Gpu => "GPU",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CPU" | "0" => Ok(Device::Cpu),
            "GPU" | "1" => Ok(Device::Gpu),
            other => anyhow::bail!("unknown device `{other}` (expected CPU or GPU)"),
        }
    }
}

/// Problem dimensions passed to a kernel executable as `N M K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulProblem {
    pub n: usize,
    pub m: usize,
    pub k: usize,
}

impl MatmulProblem {
    pub fn new(n: usize, m: usize, k: usize) -> Self {
        Self { n, m, k }
    }

    pub fn square(size: usize) -> Self {
        Self::new(size, size, size)
    }

    pub fn args(&self) -> [String; 3] {
        [self.n.to_string(), self.m.to_string(), self.k.to_string()]
    }

    /// The `NxMxK` cell used in result tables, e.g. `"1024 1024 1024"`.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.n, self.m, self.k)
    }

    pub fn parse_label(label: &str) -> anyhow::Result<Self> {
        let dims = label
            .split_whitespace()
            .map(str::parse::<usize>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| anyhow::anyhow!("invalid problem size `{label}`: {err}"))?;
        match dims.as_slice() {
            [n, m, k] => Ok(Self::new(*n, *m, *k)),
            _ => anyhow::bail!("problem size `{label}` must have three dimensions"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSize {
    pub x: u32,
    pub y: u32,
}

/// Thread coarsening as a build constant.
///
/// Older kernel sources read a single `C_FACTOR`, newer ones read
/// `C_FACTOR_X` / `C_FACTOR_Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoarseFactor {
    Uniform(u32),
    PerAxis { x: u32, y: u32 },
}

impl CoarseFactor {
    pub fn max_factor(&self) -> u32 {
        match *self {
            CoarseFactor::Uniform(f) => f,
            CoarseFactor::PerAxis { x, y } => x.max(y),
        }
    }
}

/// Compile-time tuning constants. `None` means the axis is absent for this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TuningParams {
    pub tile_size: Option<u32>,
    pub block_size: Option<BlockSize>,
    /// `Some(0)` is the "no unrolling" sentinel and emits no build flag.
    pub unroll_step: Option<u32>,
    pub coarse_factor: Option<CoarseFactor>,
}

impl TuningParams {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    pub fn with_block_size(mut self, x: u32, y: u32) -> Self {
        self.block_size = Some(BlockSize { x, y });
        self
    }

    pub fn with_unroll_step(mut self, step: u32) -> Self {
        self.unroll_step = Some(step);
        self
    }

    pub fn with_coarse_factor(mut self, factor: CoarseFactor) -> Self {
        self.coarse_factor = Some(factor);
        self
    }

    /// Short suffix naming the constants, e.g. `t16_u4_c2`.
    pub fn suffix(&self) -> String {
        let mut parts = Vec::new();
        if let Some(tile) = self.tile_size {
            parts.push(format!("t{tile}"));
        }
        if let Some(BlockSize { x, y }) = self.block_size {
            parts.push(format!("b{x}x{y}"));
        }
        if let Some(step) = self.unroll_step {
            parts.push(format!("u{step}"));
        }
        match self.coarse_factor {
            Some(CoarseFactor::Uniform(f)) => parts.push(format!("c{f}")),
            Some(CoarseFactor::PerAxis { x, y }) => parts.push(format!("c{x}x{y}")),
            None => {}
        }
        parts.join("_")
    }
}

/// Everything that determines the build command of one kernel executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelBuild {
    pub device: Device,
    pub variant: Variant,
    pub params: TuningParams,
}

impl KernelBuild {
    pub fn new(device: Device, variant: Variant, params: TuningParams) -> Self {
        Self {
            device,
            variant,
            params,
        }
    }
}

/// One point of the sweep: a build plus the problem it is run on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Configuration {
    pub build: KernelBuild,
    pub problem: MatmulProblem,
}

impl Configuration {
    pub fn new(build: KernelBuild, problem: MatmulProblem) -> Self {
        Self { build, problem }
    }

    pub fn device(&self) -> Device {
        self.build.device
    }

    pub fn variant(&self) -> &Variant {
        &self.build.variant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_label_round_trips() {
        let problem = MatmulProblem::new(1024, 2048, 4096);
        assert_eq!(problem.label(), "1024 2048 4096");
        assert_eq!(MatmulProblem::parse_label(" 1024 2048 4096 ").unwrap(), problem);
        assert!(MatmulProblem::parse_label("1024 2048").is_err());
    }

    #[test]
    fn device_parses_names_and_selectors() {
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Gpu);
        assert_eq!("0".parse::<Device>().unwrap(), Device::Cpu);
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Gpu.selector(), 1);
    }

    #[test]
    fn params_suffix_lists_present_axes() {
        let params = TuningParams::default()
            .with_tile_size(16)
            .with_unroll_step(4)
            .with_coarse_factor(CoarseFactor::PerAxis { x: 2, y: 4 });
        assert_eq!(params.suffix(), "t16_u4_c2x4");
        assert_eq!(TuningParams::default().suffix(), "");
    }
}
