//! The kernel lifecycle contract.

use crate::context::RunContext;
use crate::descriptor::{KernelCosts, KernelDescriptor};
use crate::tuning::Tuning;
use crate::variant::{Backend, VariantId};
use anyhow::Result;

/// One benchmark kernel.
///
/// The executor drives each attempt as `set_up`, `run_variant`,
/// `update_checksum`, `tear_down`. `tear_down` is called on every exit path,
/// including after a failed or partial `set_up`, and must release whatever
/// was acquired.
pub trait Kernel: Send {
    fn descriptor(&self) -> &KernelDescriptor;

    fn costs(&self) -> KernelCosts {
        self.descriptor().costs()
    }

    /// Kernel-specific tuning restrictions beyond the device limits.
    fn supports_tuning(&self, _variant: VariantId, _tuning: &Tuning) -> bool {
        true
    }

    /// Allocates and initialises data where `variant` runs. Data must be
    /// identical on every call.
    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()>;

    /// Runs the configured repetitions inside `ctx.timer`. Device work must
    /// be complete before the timer stops.
    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()>;

    /// Checksum contribution of this run, read from host memory.
    fn update_checksum(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<f64>;

    fn tear_down(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()>;
}

pub type DynKernel = Box<dyn Kernel>;

/// Tree reductions halve a per-block scratch array and need power-of-two
/// blocks on the GPU backends.
pub fn supports_tree_reduction(variant: VariantId, tuning: &Tuning) -> bool {
    match variant.backend() {
        Backend::GpuA | Backend::GpuB => tuning.block_size.is_some_and(usize::is_power_of_two),
        _ => true,
    }
}
