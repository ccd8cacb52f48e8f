//! Portable device loops.
//!
//! `DeviceExec` hides launch geometry and buffer access behind the same
//! `forall` shape host policies expose, which is what the library variants of
//! each kernel are written against.

use crate::blocks::{map_blocks, reduce_blocks};
use crate::device::{DeviceBuffer, DeviceError, DynDevice};
use crate::planner::LaunchConfig;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone)]
pub struct DeviceExec {
    device: DynDevice,
    block: usize,
}

impl DeviceExec {
    pub fn new(device: DynDevice, block: usize) -> Self {
        Self { device, block }
    }

    /// Enqueues `out[i] = body(i, inputs)` for every element of `out`.
    pub fn forall_map<F>(
        &self,
        out: &DeviceBuffer,
        inputs: &[DeviceBuffer],
        body: F,
    ) -> Result<(), DeviceError>
    where
        F: Fn(usize, &[&[f64]]) -> f64 + Send + Sync + 'static,
    {
        if inputs.iter().any(|input| input.id() == out.id()) {
            return Err(DeviceError::LaunchFailed {
                reason: format!("buffer {} is both read and written by one launch", out.id()),
            });
        }

        let config = LaunchConfig::for_len(out.len(), self.block);
        let block = config.block;
        let out = out.clone();
        let inputs = inputs.to_vec();

        self.device.launch(
            config,
            Box::new(move || {
                let guards: Vec<_> = inputs.iter().map(DeviceBuffer::read).collect();
                let views: Vec<&[f64]> = guards.iter().map(|g| g.as_slice()).collect();
                let mut target = out.write();
                map_blocks(&mut target, block, |i| body(i, views.as_slice()));
                Ok(())
            }),
        )
    }

    /// Enqueues a reduction over `len` elements. The value is available from
    /// the returned handle once the stream has drained.
    pub fn forall_reduce<T, M, C>(
        &self,
        len: usize,
        inputs: &[DeviceBuffer],
        identity: T,
        map: M,
        combine: C,
    ) -> Result<DeviceReduction<T>, DeviceError>
    where
        T: Copy + Send + Sync + 'static,
        M: Fn(usize, &[&[f64]]) -> T + Send + Sync + 'static,
        C: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let config = LaunchConfig::for_len(len, self.block);
        let block = config.block;
        let inputs = inputs.to_vec();
        let slot = Arc::new(Mutex::new(None));
        let result = Arc::clone(&slot);

        self.device.launch(
            config,
            Box::new(move || {
                let guards: Vec<_> = inputs.iter().map(DeviceBuffer::read).collect();
                let views: Vec<&[f64]> = guards.iter().map(|g| g.as_slice()).collect();
                let f = |i: usize| map(i, views.as_slice());
                let value = reduce_blocks(len, block, identity, f, &combine);
                *result.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
                Ok(())
            }),
        )?;

        Ok(DeviceReduction {
            device: Arc::clone(&self.device),
            slot,
        })
    }
}

/// Pending result of a device reduction.
pub struct DeviceReduction<T> {
    device: DynDevice,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> DeviceReduction<T> {
    pub fn new(device: DynDevice, slot: Arc<Mutex<Option<T>>>) -> Self {
        Self { device, slot }
    }

    /// Waits for the stream and returns the reduced value.
    pub fn get(self) -> Result<T, DeviceError> {
        self.device.synchronize()?;
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| DeviceError::LaunchFailed {
                reason: "reduction completed without producing a value".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceLimits};
    use crate::runtime::EmulatedDevice;
    use approx::assert_abs_diff_eq;

    fn device() -> DynDevice {
        Arc::new(EmulatedDevice::new("forall-test", DeviceLimits::default()).unwrap())
    }

    #[test]
    fn map_then_reduce() {
        let device = device();
        let exec = DeviceExec::new(Arc::clone(&device), 64);

        let a = device.allocate(300).unwrap();
        let out = device.allocate(300).unwrap();
        let host: Vec<f64> = (0..300).map(|i| i as f64).collect();
        device.upload(&a, &host).unwrap();

        exec.forall_map(&out, &[a.clone()], |i, inp| inp[0][i] * 2.0)
            .unwrap();
        let total = exec
            .forall_reduce(300, &[out.clone()], 0.0, |i, inp| inp[0][i], |x, y| x + y)
            .unwrap()
            .get()
            .unwrap();

        assert_abs_diff_eq!(total, 2.0 * (299.0 * 300.0 / 2.0), epsilon = 1e-9);
        device.free(a).unwrap();
        device.free(out).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn aliased_launch_is_rejected() {
        let device = device();
        let exec = DeviceExec::new(Arc::clone(&device), 32);
        let a = device.allocate(8).unwrap();
        assert!(exec.forall_map(&a, &[a.clone()], |_, _| 0.0).is_err());
    }
}
