//! Run parameters.

use crate::variant::VariantId;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    /// Overrides every kernel's default problem size.
    pub size: Option<usize>,
    pub size_factor: f64,
    /// Overrides every kernel's default repetition count.
    pub reps: Option<usize>,
    pub reps_factor: f64,
    pub npasses: usize,
    /// Full names, short names or groups. Empty selects everything.
    pub kernels: Vec<String>,
    pub exclude_kernels: Vec<String>,
    /// Empty selects every variant.
    pub variants: Vec<VariantId>,
    pub exclude_variants: Vec<VariantId>,
    /// Replaces each kernel's own device block-size list.
    pub gpu_block_sizes: Option<Vec<usize>>,
    pub checksum_tolerance: f64,
    /// Host pool width; 0 lets rayon decide.
    pub threads: usize,
    pub device_max_block_size: usize,
    pub device_memory_bytes: usize,
    pub dry_run: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            size: None,
            size_factor: 1.0,
            reps: None,
            reps_factor: 1.0,
            npasses: 1,
            kernels: Vec::new(),
            exclude_kernels: Vec::new(),
            variants: Vec::new(),
            exclude_variants: Vec::new(),
            gpu_block_sizes: None,
            checksum_tolerance: 1.0e-10,
            threads: 0,
            device_max_block_size: 1024,
            device_memory_bytes: 8 << 30,
            dry_run: false,
        }
    }
}

impl RunParams {
    /// Loads parameters from JSON; a missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read run parameters {}", path.display()))?;
        let params: RunParams = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse run parameters {}", path.display()))?;
        Ok(params)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.npasses > 0, "npasses must be at least 1");
        ensure!(
            self.size_factor.is_finite() && self.size_factor > 0.0,
            "size factor must be positive, got {}",
            self.size_factor
        );
        ensure!(
            self.reps_factor.is_finite() && self.reps_factor > 0.0,
            "reps factor must be positive, got {}",
            self.reps_factor
        );
        ensure!(
            self.checksum_tolerance >= 0.0,
            "checksum tolerance must be non-negative, got {}",
            self.checksum_tolerance
        );
        ensure!(
            self.device_max_block_size > 0,
            "device max block size must be positive"
        );
        if let Some(blocks) = &self.gpu_block_sizes {
            ensure!(!blocks.is_empty(), "gpu block size list is empty");
        }
        Ok(())
    }

    pub fn selects_kernel(&self, full_name: &str, name: &str, group: &str) -> bool {
        let matches = |selector: &String| {
            [full_name, name, group]
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(selector))
        };
        (self.kernels.is_empty() || self.kernels.iter().any(matches))
            && !self.exclude_kernels.iter().any(matches)
    }

    pub fn selects_variant(&self, variant: VariantId) -> bool {
        (self.variants.is_empty() || self.variants.contains(&variant))
            && !self.exclude_variants.contains(&variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = RunParams::default();
        params.validate().unwrap();
        assert_eq!(params.checksum_tolerance, 1.0e-10);
        assert_eq!(params.npasses, 1);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let zero_passes = RunParams {
            npasses: 0,
            ..RunParams::default()
        };
        assert!(zero_passes.validate().is_err());

        let no_blocks = RunParams {
            gpu_block_sizes: Some(Vec::new()),
            ..RunParams::default()
        };
        assert!(no_blocks.validate().is_err());

        let negative = RunParams {
            size_factor: -1.0,
            ..RunParams::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn kernel_selection_by_name_or_group() {
        let params = RunParams {
            kernels: vec!["stream".into(), "FIRST_MIN".into()],
            exclude_kernels: vec!["Stream_DOT".into()],
            ..RunParams::default()
        };
        assert!(params.selects_kernel("Stream_MUL", "MUL", "Stream"));
        assert!(params.selects_kernel("Lcals_FIRST_MIN", "FIRST_MIN", "Lcals"));
        assert!(!params.selects_kernel("Stream_DOT", "DOT", "Stream"));
        assert!(!params.selects_kernel("Apps_PRESSURE", "PRESSURE", "Apps"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: RunParams =
            serde_json::from_str(r#"{ "size": 1000, "variants": ["Base_Seq", "Base_Threads"] }"#)
                .unwrap();
        assert_eq!(params.size, Some(1000));
        assert_eq!(
            params.variants,
            vec![VariantId::BaseSeq, VariantId::BaseThreads]
        );
        assert_eq!(params.device_max_block_size, 1024);
    }
}
