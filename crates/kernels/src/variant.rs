//! Matrix multiplication kernel variants.
//!
//! A variant is an opaque kernel source (`<name>.cpp`). Which tuning axes it
//! understands is encoded in its name: `tiling` variants take a tile size,
//! the others take a 2D block size; `unroll` and `coarsening` variants take
//! the matching constants on top.

use serde::{Deserialize, Serialize};
use std::fmt;

const UNROLL_TAG: &str = "unroll";
const COARSENING_TAG: &str = "coarsening";
const TILING_TAG: &str = "tiling";

/// Tuning axes a variant may or may not honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TuningAxis {
    TileSize,
    BlockSize,
    UnrollStep,
    CoarseFactor,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variant {
    name: String,
}

impl Variant {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs_unroll(&self) -> bool {
        self.name.contains(UNROLL_TAG)
    }

    pub fn needs_coarsening(&self) -> bool {
        self.name.contains(COARSENING_TAG)
    }

    pub fn is_tiled(&self) -> bool {
        self.name.contains(TILING_TAG)
    }

    pub fn applies(&self, axis: TuningAxis) -> bool {
        match axis {
            TuningAxis::TileSize => self.is_tiled(),
            TuningAxis::BlockSize => !self.is_tiled(),
            TuningAxis::UnrollStep => self.needs_unroll(),
            TuningAxis::CoarseFactor => self.needs_coarsening(),
        }
    }

    pub fn source_file(&self) -> String {
        format!("{}.cpp", self.name)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Variant {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applicability_follows_name_tags() {
        let tiled = Variant::new("mat_mul_tiling_wt_thread_coarsening_and_unroll");
        assert!(tiled.is_tiled());
        assert!(tiled.needs_unroll());
        assert!(tiled.needs_coarsening());
        assert!(!tiled.applies(TuningAxis::BlockSize));

        let naive = Variant::new("mat_mul_naive");
        assert!(!naive.is_tiled());
        assert!(!naive.needs_unroll());
        assert!(!naive.needs_coarsening());
        assert!(naive.applies(TuningAxis::BlockSize));
    }

    #[test]
    fn source_file_uses_variant_name() {
        assert_eq!(Variant::new("mat_mul_tiling").source_file(), "mat_mul_tiling.cpp");
    }
}
