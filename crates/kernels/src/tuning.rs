//! Tuning candidates per (kernel, variant).

use crate::config::RunParams;
use crate::context::DeviceSet;
use crate::kernel::Kernel;
use crate::variant::{Backend, VariantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub index: usize,
    pub name: String,
    pub block_size: Option<usize>,
}

impl Tuning {
    pub fn host_default() -> Self {
        Self {
            index: 0,
            name: "default".to_string(),
            block_size: None,
        }
    }

    pub fn block(index: usize, block_size: usize) -> Self {
        Self {
            index,
            name: format!("block_{block_size}"),
            block_size: Some(block_size),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TuningCatalog {
    gpu_block_sizes: Option<Vec<usize>>,
}

impl TuningCatalog {
    pub fn new(params: &RunParams) -> Self {
        Self {
            gpu_block_sizes: params.gpu_block_sizes.clone(),
        }
    }

    /// Ordered candidates; index 0 is the default.
    pub fn candidates_for(&self, kernel: &dyn Kernel, variant: VariantId) -> Vec<Tuning> {
        let desc = kernel.descriptor();
        match variant.backend() {
            Backend::Sequential | Backend::Threads => vec![Tuning::host_default()],
            Backend::Offload => vec![Tuning::block(0, desc.offload_team_size())],
            Backend::GpuA | Backend::GpuB => {
                let blocks = self
                    .gpu_block_sizes
                    .as_deref()
                    .unwrap_or(desc.gpu_block_sizes());
                if blocks.is_empty() {
                    return vec![Tuning::host_default()];
                }
                blocks
                    .iter()
                    .enumerate()
                    .map(|(index, &block)| Tuning::block(index, block))
                    .collect()
            }
        }
    }

    /// False is a normal outcome: the candidate is reported as skipped.
    pub fn is_supported(
        &self,
        kernel: &dyn Kernel,
        variant: VariantId,
        tuning: &Tuning,
        devices: &DeviceSet,
    ) -> bool {
        if variant.is_device() {
            let Some(block) = tuning.block_size else {
                return false;
            };
            if block == 0 {
                return false;
            }
            match devices.limits(variant.backend()) {
                Some(limits) if block <= limits.max_block_size => {}
                _ => return false,
            }
        }
        kernel.supports_tuning(variant, tuning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcals::FirstMin;
    use crate::stream::StreamMul;
    use crate::testing::{small_params, test_context};

    #[test]
    fn host_variants_have_one_default_candidate() {
        let params = small_params(64, 1);
        let kernel = StreamMul::new(&params);
        let candidates = TuningCatalog::new(&params)
            .candidates_for(&kernel, VariantId::LambdaThreads);
        assert_eq!(candidates, vec![Tuning::host_default()]);
    }

    #[test]
    fn oversized_blocks_are_unsupported() {
        let params = RunParams {
            gpu_block_sizes: Some(vec![64, 128, 9999]),
            ..small_params(64, 1)
        };
        let ctx = test_context(&params);
        let kernel = StreamMul::new(&params);
        let catalog = TuningCatalog::new(&params);

        let candidates = catalog.candidates_for(&kernel, VariantId::BaseGpuA);
        let names: Vec<&str> = candidates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["block_64", "block_128", "block_9999"]);

        let supported: Vec<bool> = candidates
            .iter()
            .map(|t| catalog.is_supported(&kernel, VariantId::BaseGpuA, t, &ctx.devices))
            .collect();
        assert_eq!(supported, [true, true, false]);
    }

    #[test]
    fn kernel_predicate_is_consulted() {
        let params = RunParams {
            gpu_block_sizes: Some(vec![96, 128]),
            ..small_params(64, 1)
        };
        let ctx = test_context(&params);
        let kernel = FirstMin::new(&params);
        let catalog = TuningCatalog::new(&params);
        let candidates = catalog.candidates_for(&kernel, VariantId::BaseGpuB);

        assert!(!catalog.is_supported(&kernel, VariantId::BaseGpuB, &candidates[0], &ctx.devices));
        assert!(catalog.is_supported(&kernel, VariantId::BaseGpuB, &candidates[1], &ctx.devices));
    }
}
