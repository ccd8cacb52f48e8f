//! Kernel and variant registries.

use crate::config::RunParams;
use crate::context::DeviceSet;
use crate::kernel::{DynKernel, Kernel};
use crate::variant::VariantId;
use anyhow::{bail, Result};
use tracing::debug;

#[derive(Default)]
pub struct KernelRegistry {
    kernels: Vec<DynKernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: Vec::new(),
        }
    }

    /// Every shipped kernel, sized by `params`, in suite order.
    pub fn with_default_kernels(params: &RunParams) -> Self {
        let mut registry = Self::new();
        registry.register_kernel(crate::lcals::FirstMin::new(params));
        registry.register_kernel(crate::polybench::Atax::new(params));
        registry.register_kernel(crate::stream::StreamAdd::new(params));
        registry.register_kernel(crate::stream::StreamDot::new(params));
        registry.register_kernel(crate::stream::StreamMul::new(params));
        registry.register_kernel(crate::stream::StreamTriad::new(params));
        registry.register_kernel(crate::apps::Pressure::new(params));
        registry
    }

    pub fn register_kernel<K>(&mut self, kernel: K)
    where
        K: Kernel + 'static,
    {
        self.kernels.push(Box::new(kernel));
    }

    pub fn kernels(&self) -> &[DynKernel] {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut [DynKernel] {
        &mut self.kernels
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Looks a kernel up by full name (`Stream_MUL`) or short name.
    pub fn find_kernel(&self, name: &str) -> Option<&dyn Kernel> {
        self.kernels
            .iter()
            .find(|kernel| {
                let desc = kernel.descriptor();
                desc.full_name().eq_ignore_ascii_case(name)
                    || desc.name().eq_ignore_ascii_case(name)
            })
            .map(|kernel| kernel.as_ref())
    }

    /// Keeps only kernels the run selects. Every requested name must match
    /// at least one registered kernel.
    pub fn retain_selected(&mut self, params: &RunParams) -> Result<()> {
        for selector in params.kernels.iter().chain(&params.exclude_kernels) {
            let known = self.kernels.iter().any(|kernel| {
                let desc = kernel.descriptor();
                [desc.full_name().as_str(), desc.name(), desc.group()]
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(selector))
            });
            if !known {
                bail!("unknown kernel or group '{selector}'");
            }
        }

        self.kernels.retain(|kernel| {
            let desc = kernel.descriptor();
            params.selects_kernel(&desc.full_name(), desc.name(), desc.group())
        });
        debug!(kernels = self.kernels.len(), "kernel selection applied");
        Ok(())
    }
}

/// Which variants can run here: compiled into the build, backed by a device
/// when they need one, and selected by the run.
#[derive(Debug, Clone)]
pub struct VariantRegistry {
    available: Vec<VariantId>,
    selected: Vec<VariantId>,
}

impl VariantRegistry {
    pub fn new(devices: &DeviceSet, params: &RunParams) -> Self {
        let available: Vec<VariantId> = VariantId::ALL
            .into_iter()
            .filter(|variant| {
                let backend = variant.backend();
                backend.is_compiled() && (!backend.is_device() || devices.get(backend).is_some())
            })
            .collect();
        let selected = VariantId::ALL
            .into_iter()
            .filter(|variant| params.selects_variant(*variant))
            .collect();
        Self {
            available,
            selected,
        }
    }

    pub fn is_defined(kernel: &dyn Kernel, variant: VariantId) -> bool {
        kernel.descriptor().defines(variant)
    }

    pub fn is_available(&self, variant: VariantId) -> bool {
        self.available.contains(&variant)
    }

    pub fn is_selected(&self, variant: VariantId) -> bool {
        self.selected.contains(&variant)
    }
}
