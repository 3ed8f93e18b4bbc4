//! Kernel variant registry for lookup and discovery.

use crate::variant::Variant;
use anyhow::{anyhow, Result};

/// Variants shipped with the matmul benchmark sources, in sweep order.
pub const DEFAULT_MATMUL_VARIANTS: [&str; 8] = [
    "mat_mul_naive",
    "mat_mul_naive_wt_unroll",
    "mat_mul_naive_wt_coarsening",
    "mat_mul_naive_wt_coarsening_and_unroll",
    "mat_mul_tiling",
    "mat_mul_tiling_wt_unroll",
    "mat_mul_tiling_wt_thread_coarsening",
    "mat_mul_tiling_wt_thread_coarsening_and_unroll",
];

#[derive(Debug, Clone, Default)]
pub struct VariantRegistry {
    variants: Vec<Variant>,
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self {
            variants: Vec::new(),
        }
    }

    pub fn with_default_matmul_variants() -> Self {
        let mut registry = Self::new();
        for name in DEFAULT_MATMUL_VARIANTS {
            registry.register(Variant::new(name));
        }
        registry
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.register(Variant::new(name));
        }
        registry
    }

    /// Registers a variant; duplicates are ignored so sweep order stays stable.
    pub fn register(&mut self, variant: Variant) {
        if !self.variants.contains(&variant) {
            self.variants.push(variant);
        }
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn find(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|variant| variant.name() == name)
    }

    /// Resolves a selection of names, or every registered variant when empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<Variant>> {
        if names.is_empty() {
            return Ok(self.variants.clone());
        }
        names
            .iter()
            .map(|name| {
                self.find(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("unknown kernel variant `{name}`"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_keeps_sweep_order() {
        let registry = VariantRegistry::with_default_matmul_variants();
        assert_eq!(registry.variants().len(), 8);
        assert_eq!(registry.variants()[0].name(), "mat_mul_naive");
        assert!(registry.find("mat_mul_tiling_wt_unroll").is_some());
    }

    #[test]
    fn select_rejects_unknown_names() {
        let registry = VariantRegistry::with_default_matmul_variants();
        assert_eq!(registry.select(&[]).unwrap().len(), 8);
        let picked = registry.select(&["mat_mul_tiling".to_string()]).unwrap();
        assert_eq!(picked, vec![Variant::new("mat_mul_tiling")]);
        assert!(registry.select(&["mat_mul_fft".to_string()]).is_err());
    }

    #[test]
    fn register_ignores_duplicates() {
        let registry = VariantRegistry::from_names(["a", "b", "a"]);
        assert_eq!(registry.variants().len(), 2);
    }
}
