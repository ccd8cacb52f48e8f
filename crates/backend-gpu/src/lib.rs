//! Accelerator backend for perfsweep.
//!
//! Exposes the device runtime contract (`Device`), launch planning, and an
//! emulated device whose stream executes on host threads.

pub mod blocks;
pub mod device;
pub mod forall;
pub mod planner;
pub mod runtime;

pub use device::{Device, DeviceBuffer, DeviceError, DeviceJob, DeviceLimits, DynDevice};
pub use forall::{DeviceExec, DeviceReduction};
pub use planner::{LaunchConfig, LaunchPlanner};
pub use runtime::EmulatedDevice;
