//! Device abstraction consumed by kernels and the sweep executor.

use crate::planner::LaunchConfig;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("device out of memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("buffer {id} is not owned by this device or was already freed")]
    InvalidBuffer { id: u64 },

    #[error("transfer length mismatch: buffer holds {expected} elements, host slice holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("block size {block} exceeds device limit {max}")]
    BlockSizeExceeded { block: usize, max: usize },

    #[error("kernel launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("device stream disconnected")]
    Disconnected,

    #[error("device unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Hardware limits a tuning candidate is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_block_size: usize,
    pub memory_bytes: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_block_size: 1024,
            memory_bytes: 8 << 30,
        }
    }
}

/// Handle to a device-resident array of `f64`.
///
/// Cloning the handle does not copy device memory; launched work captures
/// clones so it can run on the device stream after the launching call returns.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    id: u64,
    len: usize,
    data: Arc<RwLock<Vec<f64>>>,
}

impl DeviceBuffer {
    pub(crate) fn new(id: u64, len: usize) -> Self {
        Self {
            id,
            len,
            data: Arc::new(RwLock::new(vec![0.0; len])),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len * std::mem::size_of::<f64>()
    }

    /// Read access from inside launched work.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access from inside launched work.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<f64>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Work enqueued on a device stream.
pub type DeviceJob = Box<dyn FnOnce() -> Result<(), DeviceError> + Send + 'static>;

/// Accelerator runtime primitives.
///
/// `launch` is asynchronous: it only enqueues work. Callers that time device
/// work must call `synchronize` before reading a clock. Transfers are
/// synchronous and drain the stream first.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn limits(&self) -> DeviceLimits;
    fn allocate(&self, len: usize) -> Result<DeviceBuffer, DeviceError>;
    fn upload(&self, dst: &DeviceBuffer, src: &[f64]) -> Result<(), DeviceError>;
    fn download(&self, src: &DeviceBuffer, dst: &mut [f64]) -> Result<(), DeviceError>;
    fn free(&self, buffer: DeviceBuffer) -> Result<(), DeviceError>;
    fn launch(&self, config: LaunchConfig, job: DeviceJob) -> Result<(), DeviceError>;
    fn synchronize(&self) -> Result<(), DeviceError>;
    /// True when no launched work is queued or running.
    fn is_idle(&self) -> bool;
    fn allocated_bytes(&self) -> usize;
}

pub type DynDevice = Arc<dyn Device>;
