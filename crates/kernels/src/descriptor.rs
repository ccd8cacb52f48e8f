//! Static kernel metadata and the sizes derived from run parameters.

use crate::config::RunParams;
use crate::variant::VariantId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GPU_BLOCK_SIZE: usize = 256;
pub const DEFAULT_OFFLOAD_TEAM_SIZE: usize = 256;

/// Per-repetition cost model used for throughput figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelCosts {
    pub bytes_per_rep: usize,
    pub flops_per_rep: usize,
    pub its_per_rep: usize,
    pub kernels_per_rep: usize,
}

impl KernelCosts {
    pub fn new(bytes_per_rep: usize, flops_per_rep: usize) -> Self {
        Self {
            bytes_per_rep,
            flops_per_rep,
            its_per_rep: 0,
            kernels_per_rep: 1,
        }
    }

    pub fn with_its(mut self, its_per_rep: usize) -> Self {
        self.its_per_rep = its_per_rep;
        self
    }

    pub fn with_kernels(mut self, kernels_per_rep: usize) -> Self {
        self.kernels_per_rep = kernels_per_rep;
        self
    }
}

#[derive(Debug, Clone)]
pub struct KernelDescriptor {
    group: &'static str,
    name: &'static str,
    default_size: usize,
    default_reps: usize,
    target_size: usize,
    actual_size: usize,
    run_reps: usize,
    costs: KernelCosts,
    checksum_scale_factor: f64,
    variants: Vec<VariantId>,
    gpu_block_sizes: Vec<usize>,
    offload_team_size: usize,
}

impl KernelDescriptor {
    pub fn new(group: &'static str, name: &'static str) -> Self {
        Self {
            group,
            name,
            default_size: 1,
            default_reps: 1,
            target_size: 1,
            actual_size: 1,
            run_reps: 1,
            costs: KernelCosts::default(),
            checksum_scale_factor: 1.0,
            variants: Vec::new(),
            gpu_block_sizes: vec![DEFAULT_GPU_BLOCK_SIZE],
            offload_team_size: DEFAULT_OFFLOAD_TEAM_SIZE,
        }
    }

    pub fn with_default_size(mut self, size: usize) -> Self {
        self.default_size = size;
        self
    }

    pub fn with_default_reps(mut self, reps: usize) -> Self {
        self.default_reps = reps;
        self
    }

    pub fn with_variants(mut self, variants: impl IntoIterator<Item = VariantId>) -> Self {
        self.variants = variants.into_iter().collect();
        self.variants.sort();
        self.variants.dedup();
        self
    }

    pub fn with_all_variants(self) -> Self {
        self.with_variants(VariantId::ALL)
    }

    pub fn with_gpu_block_sizes(mut self, blocks: Vec<usize>) -> Self {
        self.gpu_block_sizes = blocks;
        self
    }

    pub fn with_offload_team_size(mut self, team: usize) -> Self {
        self.offload_team_size = team;
        self
    }

    /// Derives target size and run repetitions. Kernels then set the actual
    /// size (which may differ from the target) and their costs.
    pub fn configure(&mut self, params: &RunParams) {
        self.target_size = params
            .size
            .unwrap_or_else(|| scale(self.default_size, params.size_factor))
            .max(1);
        self.run_reps = params
            .reps
            .unwrap_or_else(|| scale(self.default_reps, params.reps_factor))
            .max(1);
        self.actual_size = self.target_size;
    }

    pub fn set_actual_size(&mut self, size: usize) {
        self.actual_size = size;
    }

    pub fn set_costs(&mut self, costs: KernelCosts) {
        self.costs = costs;
    }

    pub fn set_checksum_scale_factor(&mut self, factor: f64) {
        self.checksum_scale_factor = factor;
    }

    pub fn group(&self) -> &'static str {
        self.group
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `Group_NAME`, the identifier used in reports.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.group, self.name)
    }

    pub fn default_size(&self) -> usize {
        self.default_size
    }

    pub fn default_reps(&self) -> usize {
        self.default_reps
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn actual_size(&self) -> usize {
        self.actual_size
    }

    pub fn run_reps(&self) -> usize {
        self.run_reps
    }

    pub fn costs(&self) -> KernelCosts {
        self.costs
    }

    pub fn checksum_scale_factor(&self) -> f64 {
        self.checksum_scale_factor
    }

    pub fn variants(&self) -> &[VariantId] {
        &self.variants
    }

    pub fn defines(&self, variant: VariantId) -> bool {
        self.variants.contains(&variant)
    }

    pub fn gpu_block_sizes(&self) -> &[usize] {
        &self.gpu_block_sizes
    }

    pub fn offload_team_size(&self) -> usize {
        self.offload_team_size
    }
}

fn scale(value: usize, factor: f64) -> usize {
    (value as f64 * factor).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_applies_overrides_and_factors() {
        let mut desc = KernelDescriptor::new("Stream", "MUL")
            .with_default_size(1000)
            .with_default_reps(10)
            .with_all_variants();

        desc.configure(&RunParams {
            size_factor: 0.5,
            reps_factor: 2.0,
            ..RunParams::default()
        });
        assert_eq!(desc.target_size(), 500);
        assert_eq!(desc.run_reps(), 20);

        desc.configure(&RunParams {
            size: Some(64),
            reps: Some(0),
            ..RunParams::default()
        });
        assert_eq!(desc.actual_size(), 64);
        assert_eq!(desc.run_reps(), 1);
        assert_eq!(desc.full_name(), "Stream_MUL");
    }

    #[test]
    fn variants_are_kept_in_declared_order() {
        let desc = KernelDescriptor::new("Test", "K").with_variants([
            VariantId::BaseThreads,
            VariantId::BaseSeq,
            VariantId::BaseSeq,
        ]);
        assert_eq!(
            desc.variants(),
            &[VariantId::BaseSeq, VariantId::BaseThreads]
        );
        assert!(!desc.defines(VariantId::BaseGpuA));
    }
}
