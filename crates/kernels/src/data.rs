//! Kernel working data: deterministic initial values and host/device arrays.

use anyhow::{anyhow, Context, Result};
use perfsweep_backend_gpu::{DeviceBuffer, DynDevice};

const RANDOM_SEED: u64 = 4793;

/// Deterministic initial values.
///
/// Successive calls alternate a scale factor between 0.2 and 0.1, so arrays
/// initialised in one `set_up` differ from one another. A fresh `DataInit`
/// per `set_up` makes every set-up produce identical data.
#[derive(Debug, Clone, Default)]
pub struct DataInit {
    count: u64,
}

impl DataInit {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_factor(&mut self) -> f64 {
        let factor = if self.count % 2 == 1 { 0.1 } else { 0.2 };
        self.count += 1;
        factor
    }

    /// `factor · (i + 1.1) / (i + 1.12345)`
    pub fn values(&mut self, len: usize) -> Vec<f64> {
        let factor = self.next_factor();
        (0..len)
            .map(|i| factor * (i as f64 + 1.1) / (i as f64 + 1.12345))
            .collect()
    }

    pub fn scalar(&mut self) -> f64 {
        let factor = self.next_factor();
        factor * 1.1 / 1.12345
    }

    pub fn constant(&mut self, len: usize, value: f64) -> Vec<f64> {
        self.count += 1;
        vec![value; len]
    }

    /// Uniform values in `[0, 1)` from a seeded generator.
    pub fn random(&mut self, len: usize) -> Vec<f64> {
        let mut rng = fastrand::Rng::with_seed(RANDOM_SEED + self.count);
        self.count += 1;
        (0..len).map(|_| rng.f64()).collect()
    }
}

/// Where a variant's arrays live.
#[derive(Clone)]
pub enum DataSpace {
    Host,
    Device(DynDevice),
}

/// A host array with an optional device mirror.
pub struct KernelArray {
    host: Vec<f64>,
    device: Option<(DynDevice, DeviceBuffer)>,
}

impl KernelArray {
    /// Places `host` in `space`, uploading it when the space is a device.
    pub fn allocate(host: Vec<f64>, space: &DataSpace) -> Result<Self> {
        let device = match space {
            DataSpace::Host => None,
            DataSpace::Device(device) => {
                let buffer = device.allocate(host.len())?;
                if let Err(err) = device.upload(&buffer, &host) {
                    // Not yet owned by a KernelArray, so nothing else would free it.
                    let _ = device.free(buffer);
                    return Err(err.into());
                }
                Some((DynDevice::clone(device), buffer))
            }
        };
        Ok(Self { host, device })
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn host(&self) -> &[f64] {
        &self.host
    }

    pub fn device_buffer(&self) -> Option<&DeviceBuffer> {
        self.device.as_ref().map(|(_, buffer)| buffer)
    }

    /// Copies device contents back into the host array.
    pub fn sync_to_host(&mut self) -> Result<()> {
        if let Some((device, buffer)) = &self.device {
            device.download(buffer, &mut self.host)?;
        }
        Ok(())
    }

    pub fn release(self) -> Result<()> {
        if let Some((device, buffer)) = self.device {
            device.free(buffer)?;
        }
        Ok(())
    }
}

/// Arrays owned by a kernel between `set_up` and `tear_down`, addressed by
/// the index `push` returned.
#[derive(Default)]
pub struct ArraySet {
    arrays: Vec<KernelArray>,
}

impl ArraySet {
    pub fn push(&mut self, host: Vec<f64>, space: &DataSpace) -> Result<usize> {
        let array = KernelArray::allocate(host, space)
            .with_context(|| format!("failed to allocate array {}", self.arrays.len()))?;
        self.arrays.push(array);
        Ok(self.arrays.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&KernelArray> {
        self.arrays
            .get(index)
            .ok_or_else(|| anyhow!("array {index} is not set up"))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut KernelArray> {
        self.arrays
            .get_mut(index)
            .ok_or_else(|| anyhow!("array {index} is not set up"))
    }

    pub fn host(&self, index: usize) -> Result<&[f64]> {
        Ok(self.get(index)?.host())
    }

    pub fn host_views(&self, indices: &[usize]) -> Result<Vec<&[f64]>> {
        indices.iter().map(|&index| self.host(index)).collect()
    }

    pub fn device_buffers(&self, indices: &[usize]) -> Result<Vec<DeviceBuffer>> {
        indices
            .iter()
            .map(|&index| {
                self.get(index)?
                    .device_buffer()
                    .cloned()
                    .ok_or_else(|| anyhow!("array {index} has no device copy"))
            })
            .collect()
    }

    /// Moves the host vector out so it can be written while other arrays are
    /// read. Pair with `restore_host`.
    pub fn take_host(&mut self, index: usize) -> Result<Vec<f64>> {
        Ok(std::mem::take(&mut self.get_mut(index)?.host))
    }

    pub fn restore_host(&mut self, index: usize, host: Vec<f64>) -> Result<()> {
        self.get_mut(index)?.host = host;
        Ok(())
    }

    /// Host view of `index` after copying back any device contents.
    pub fn sync_to_host(&mut self, index: usize) -> Result<&[f64]> {
        let array = self.get_mut(index)?;
        array.sync_to_host()?;
        Ok(array.host())
    }

    /// Releases every array, including those from a partially completed
    /// `set_up`. Keeps going after a failure and reports the first one.
    pub fn release_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for array in self.arrays.drain(..) {
            if let Err(err) = array.release() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use perfsweep_backend_gpu::{Device, DeviceLimits, EmulatedDevice};
    use std::sync::Arc;

    #[test]
    fn factor_alternates_and_restarts() {
        let mut init = DataInit::new();
        let first = init.values(3);
        let second = init.values(3);
        assert_abs_diff_eq!(first[0], 0.2 * 1.1 / 1.12345);
        assert_abs_diff_eq!(second[0], 0.1 * 1.1 / 1.12345);

        let mut again = DataInit::new();
        assert_eq!(again.values(3), first);
        assert_eq!(again.values(3), second);
    }

    #[test]
    fn random_is_seeded() {
        let a = DataInit::new().random(16);
        let b = DataInit::new().random(16);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn device_arrays_are_released() {
        let device = Arc::new(EmulatedDevice::new("data-test", DeviceLimits::default()).unwrap());
        let space = DataSpace::Device(device.clone());
        let mut set = ArraySet::default();
        let idx = set.push(vec![1.0, 2.0, 3.0], &space).unwrap();

        assert_eq!(device.allocated_bytes(), 24);
        assert_eq!(set.sync_to_host(idx).unwrap(), &[1.0, 2.0, 3.0]);

        set.release_all().unwrap();
        assert!(set.is_empty());
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn partial_set_up_is_released() {
        let device = Arc::new(EmulatedDevice::new("data-test", DeviceLimits::default()).unwrap());
        device.fail_allocations_after(1);
        let space = DataSpace::Device(device.clone());
        let mut set = ArraySet::default();

        assert!(set.push(vec![0.0; 8], &space).is_ok());
        assert!(set.push(vec![0.0; 8], &space).is_err());
        set.release_all().unwrap();
        assert_eq!(device.allocated_bytes(), 0);
    }
}
