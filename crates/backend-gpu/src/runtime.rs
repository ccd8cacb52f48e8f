//! Host-backed accelerator runtime.
//!
//! `EmulatedDevice` behaves like a discrete accelerator from the caller's
//! point of view: memory is allocated against a fixed capacity, launches are
//! queued on a stream serviced by a dedicated worker thread, and completion
//! is only observable through `synchronize`. Work inside a launch runs on the
//! rayon pool, one rayon task per block.

use crate::device::{Device, DeviceBuffer, DeviceError, DeviceJob, DeviceLimits};
use crate::planner::{LaunchConfig, LaunchPlanner};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StreamState {
    pending: Mutex<usize>,
    drained: Condvar,
    error: Mutex<Option<DeviceError>>,
}

impl StreamState {
    fn enqueue(&self) {
        *lock(&self.pending) += 1;
    }

    fn complete_one(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn record_error(&self, err: DeviceError) {
        // Sticky: the first failure wins until someone synchronizes.
        lock(&self.error).get_or_insert(err);
    }

    fn wait_drained(&self) {
        let mut pending = lock(&self.pending);
        while *pending > 0 {
            pending = self
                .drained
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_drained(&self) -> bool {
        *lock(&self.pending) == 0
    }
}

#[derive(Default)]
struct MemoryLedger {
    live: HashMap<u64, usize>,
    allocated: usize,
    allocations: usize,
    fail_after: Option<usize>,
}

pub struct EmulatedDevice {
    name: String,
    limits: DeviceLimits,
    planner: LaunchPlanner,
    next_id: AtomicU64,
    memory: Mutex<MemoryLedger>,
    fail_next_launch: AtomicBool,
    sender: Mutex<Option<mpsc::Sender<DeviceJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<StreamState>,
}

impl EmulatedDevice {
    pub fn new(name: impl Into<String>, limits: DeviceLimits) -> Result<Self, DeviceError> {
        let name = name.into();
        let state = Arc::new(StreamState::default());
        let (sender, receiver) = mpsc::channel::<DeviceJob>();

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name(format!("{name}-stream"))
            .spawn(move || stream_worker(receiver, worker_state))
            .map_err(|err| DeviceError::Unavailable {
                reason: format!("failed to spawn stream worker: {err}"),
            })?;

        debug!(
            device = %name,
            max_block_size = limits.max_block_size,
            memory_bytes = limits.memory_bytes,
            "emulated device ready"
        );

        Ok(Self {
            name,
            limits,
            planner: LaunchPlanner::new(limits),
            next_id: AtomicU64::new(1),
            memory: Mutex::new(MemoryLedger::default()),
            fail_next_launch: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            state,
        })
    }

    /// Let `successful` more allocations through, then report out-of-memory.
    pub fn fail_allocations_after(&self, successful: usize) {
        let mut memory = lock(&self.memory);
        memory.fail_after = Some(memory.allocations + successful);
    }

    /// The next launch is replaced by work that reports a launch failure.
    pub fn fail_next_launch(&self) {
        self.fail_next_launch.store(true, Ordering::SeqCst);
    }

    pub fn live_buffers(&self) -> usize {
        lock(&self.memory).live.len()
    }

    fn check_owned(&self, buffer: &DeviceBuffer) -> Result<(), DeviceError> {
        if lock(&self.memory).live.contains_key(&buffer.id()) {
            Ok(())
        } else {
            Err(DeviceError::InvalidBuffer { id: buffer.id() })
        }
    }
}

impl Device for EmulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn allocate(&self, len: usize) -> Result<DeviceBuffer, DeviceError> {
        let requested = len * std::mem::size_of::<f64>();
        let mut memory = lock(&self.memory);
        let available = self.limits.memory_bytes.saturating_sub(memory.allocated);

        let injected = memory
            .fail_after
            .is_some_and(|limit| memory.allocations >= limit);
        if injected || requested > available {
            return Err(DeviceError::OutOfMemory {
                requested,
                available,
            });
        }

        let buffer = DeviceBuffer::new(self.next_id.fetch_add(1, Ordering::Relaxed), len);
        memory.live.insert(buffer.id(), requested);
        memory.allocated += requested;
        memory.allocations += 1;
        Ok(buffer)
    }

    fn upload(&self, dst: &DeviceBuffer, src: &[f64]) -> Result<(), DeviceError> {
        self.synchronize()?;
        self.check_owned(dst)?;
        if dst.len() != src.len() {
            return Err(DeviceError::LengthMismatch {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        dst.write().copy_from_slice(src);
        Ok(())
    }

    fn download(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<(), DeviceError> {
        self.synchronize()?;
        self.check_owned(src)?;
        if src.len() != dst.len() {
            return Err(DeviceError::LengthMismatch {
                expected: src.len(),
                actual: dst.len(),
            });
        }
        dst.copy_from_slice(&src.read());
        Ok(())
    }

    fn free(&self, buffer: DeviceBuffer) -> Result<(), DeviceError> {
        // Freeing waits for in-flight work that may still reference the buffer.
        self.state.wait_drained();
        let mut memory = lock(&self.memory);
        let bytes = memory
            .live
            .remove(&buffer.id())
            .ok_or(DeviceError::InvalidBuffer { id: buffer.id() })?;
        memory.allocated -= bytes;
        Ok(())
    }

    fn launch(&self, config: LaunchConfig, job: DeviceJob) -> Result<(), DeviceError> {
        self.planner.check_block(config.block)?;

        let job: DeviceJob = if self.fail_next_launch.swap(false, Ordering::SeqCst) {
            Box::new(|| {
                Err(DeviceError::LaunchFailed {
                    reason: "injected launch fault".into(),
                })
            })
        } else {
            job
        };

        let sender = lock(&self.sender);
        let sender = sender.as_ref().ok_or(DeviceError::Disconnected)?;
        self.state.enqueue();
        if sender.send(job).is_err() {
            self.state.complete_one();
            return Err(DeviceError::Disconnected);
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.state.wait_drained();
        match lock(&self.state.error).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_idle(&self) -> bool {
        self.state.is_drained()
    }

    fn allocated_bytes(&self) -> usize {
        lock(&self.memory).allocated
    }
}

impl Drop for EmulatedDevice {
    fn drop(&mut self) {
        lock(&self.sender).take();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                warn!(device = %self.name, "stream worker terminated abnormally");
            }
        }
    }
}

fn stream_worker(receiver: mpsc::Receiver<DeviceJob>, state: Arc<StreamState>) {
    for job in receiver {
        let outcome = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
            Err(DeviceError::LaunchFailed {
                reason: "device work panicked".into(),
            })
        });
        if let Err(err) = outcome {
            state.record_error(err);
        }
        state.complete_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_device() -> EmulatedDevice {
        EmulatedDevice::new(
            "test-gpu",
            DeviceLimits {
                max_block_size: 256,
                memory_bytes: 1024 * std::mem::size_of::<f64>(),
            },
        )
        .expect("device")
    }

    #[test]
    fn transfers_round_trip_and_free_releases_memory() {
        let device = small_device();
        let buffer = device.allocate(16).unwrap();
        assert_eq!(device.allocated_bytes(), 16 * 8);

        let src: Vec<f64> = (0..16).map(|i| i as f64 * 0.5).collect();
        device.upload(&buffer, &src).unwrap();
        let mut dst = vec![0.0; 16];
        device.download(&buffer, &mut dst).unwrap();
        assert_eq!(src, dst);

        device.free(buffer.clone()).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(
            device.free(buffer),
            Err(DeviceError::InvalidBuffer { id: 1 })
        );
    }

    #[test]
    fn allocation_beyond_capacity_is_out_of_memory() {
        let device = small_device();
        let _held = device.allocate(1000).unwrap();
        let err = device.allocate(100).unwrap_err();
        assert!(matches!(err, DeviceError::OutOfMemory { .. }));
    }

    #[test]
    fn injected_allocation_failure() {
        let device = small_device();
        device.fail_allocations_after(1);
        assert!(device.allocate(4).is_ok());
        assert!(matches!(
            device.allocate(4),
            Err(DeviceError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn launch_is_asynchronous_until_synchronize() {
        let device = small_device();
        let buffer = device.allocate(8).unwrap();
        let (release, gate) = mpsc::channel::<()>();

        let target = buffer.clone();
        device
            .launch(
                LaunchConfig::for_len(8, 8),
                Box::new(move || {
                    let _ = gate.recv_timeout(Duration::from_secs(5));
                    target.write().iter_mut().for_each(|v| *v = 3.0);
                    Ok(())
                }),
            )
            .unwrap();

        assert!(!device.is_idle());
        release.send(()).unwrap();
        device.synchronize().unwrap();
        assert!(device.is_idle());
        assert!(buffer.read().iter().all(|v| *v == 3.0));
    }

    #[test]
    fn launch_errors_surface_at_synchronize() {
        let device = small_device();
        device.fail_next_launch();
        device
            .launch(LaunchConfig::for_len(4, 4), Box::new(|| Ok(())))
            .unwrap();
        assert!(matches!(
            device.synchronize(),
            Err(DeviceError::LaunchFailed { .. })
        ));
        // The error is consumed by the synchronize that reported it.
        assert!(device.synchronize().is_ok());
    }

    #[test]
    fn panicking_work_is_reported_not_propagated() {
        let device = small_device();
        device
            .launch(
                LaunchConfig::for_len(1, 1),
                Box::new(|| panic!("bad kernel")),
            )
            .unwrap();
        assert!(device.synchronize().is_err());
    }

    #[test]
    fn oversized_block_is_rejected_at_launch() {
        let device = small_device();
        let err = device
            .launch(LaunchConfig::for_len(4, 512), Box::new(|| Ok(())))
            .unwrap_err();
        assert_eq!(
            err,
            DeviceError::BlockSizeExceeded {
                block: 512,
                max: 256
            }
        );
        assert!(device.is_idle());
    }
}
