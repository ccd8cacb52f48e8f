//! Kernel lifecycle contract, variant and tuning registries, and the
//! benchmark kernels for perfsweep.

pub mod apps;
pub mod checksum;
pub mod config;
pub mod context;
pub mod data;
pub mod descriptor;
pub mod exec;
pub mod kernel;
pub mod lcals;
pub mod polybench;
pub mod registry;
pub mod stream;
pub mod timer;
pub mod tuning;
pub mod utils;
pub mod variant;

#[cfg(test)]
mod testing;

pub use checksum::{calc_checksum, checksums_agree, ChecksumAccumulator};
pub use config::RunParams;
pub use context::{DeviceSet, RunContext};
pub use data::{ArraySet, DataInit, DataSpace, KernelArray};
pub use descriptor::{KernelCosts, KernelDescriptor};
pub use exec::{run_map_steps, ExecTarget, MapStep, ReduceStep};
pub use kernel::{supports_tree_reduction, DynKernel, Kernel};
pub use registry::{KernelRegistry, VariantRegistry};
pub use timer::Timer;
pub use tuning::{Tuning, TuningCatalog};
pub use utils::timed_reps;
pub use variant::{Backend, Flavor, VariantId};
