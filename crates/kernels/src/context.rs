//! Shared state handed to kernels during a run.

use crate::config::RunParams;
use crate::data::DataSpace;
use crate::timer::Timer;
use crate::variant::{Backend, VariantId};
use anyhow::{anyhow, Result};
use perfsweep_backend_cpu::HostPool;
use perfsweep_backend_gpu::{DeviceLimits, DynDevice, EmulatedDevice};
use std::sync::Arc;

/// One optional device per device backend.
#[derive(Clone, Default)]
pub struct DeviceSet {
    gpu_a: Option<DynDevice>,
    gpu_b: Option<DynDevice>,
    offload: Option<DynDevice>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulated devices for every device backend compiled into this build.
    pub fn emulated(limits: DeviceLimits) -> Result<Self> {
        let mut devices = Self::new();
        for (backend, name) in [
            (Backend::GpuA, "gpu-a"),
            (Backend::GpuB, "gpu-b"),
            (Backend::Offload, "offload"),
        ] {
            if backend.is_compiled() {
                let device: DynDevice = Arc::new(EmulatedDevice::new(name, limits)?);
                devices = devices.with_device(backend, device);
            }
        }
        Ok(devices)
    }

    pub fn with_device(mut self, backend: Backend, device: DynDevice) -> Self {
        match backend {
            Backend::GpuA => self.gpu_a = Some(device),
            Backend::GpuB => self.gpu_b = Some(device),
            Backend::Offload => self.offload = Some(device),
            Backend::Sequential | Backend::Threads => {}
        }
        self
    }

    pub fn get(&self, backend: Backend) -> Option<&DynDevice> {
        match backend {
            Backend::GpuA => self.gpu_a.as_ref(),
            Backend::GpuB => self.gpu_b.as_ref(),
            Backend::Offload => self.offload.as_ref(),
            Backend::Sequential | Backend::Threads => None,
        }
    }

    pub fn limits(&self, backend: Backend) -> Option<DeviceLimits> {
        self.get(backend).map(|device| device.limits())
    }
}

pub struct RunContext {
    pub timer: Timer,
    pub pool: HostPool,
    pub devices: DeviceSet,
}

impl RunContext {
    pub fn new(params: &RunParams) -> Result<Self> {
        let limits = DeviceLimits {
            max_block_size: params.device_max_block_size,
            memory_bytes: params.device_memory_bytes,
        };
        Ok(Self::with_devices(
            HostPool::new(params.threads)?,
            DeviceSet::emulated(limits)?,
        ))
    }

    pub fn with_devices(pool: HostPool, devices: DeviceSet) -> Self {
        Self {
            timer: Timer::new(),
            pool,
            devices,
        }
    }

    pub fn device_for(&self, variant: VariantId) -> Option<&DynDevice> {
        self.devices.get(variant.backend())
    }

    pub fn data_space(&self, variant: VariantId) -> Result<DataSpace> {
        if !variant.is_device() {
            return Ok(DataSpace::Host);
        }
        self.device_for(variant)
            .map(|device| DataSpace::Device(Arc::clone(device)))
            .ok_or_else(|| anyhow!("no device available for {variant}"))
    }
}
