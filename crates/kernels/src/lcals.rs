//! Livermore loops.

use crate::config::RunParams;
use crate::context::RunContext;
use crate::data::{ArraySet, DataInit};
use crate::descriptor::{KernelCosts, KernelDescriptor};
use crate::exec::{ExecTarget, ReduceStep};
use crate::kernel::{supports_tree_reduction, Kernel};
use crate::tuning::Tuning;
use crate::utils::timed_reps;
use crate::variant::VariantId;
use anyhow::Result;

/// Value and index of a minimum. Ties resolve to the lower index so every
/// reduction order finds the same location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinLoc {
    pub val: f64,
    pub loc: usize,
}

impl MinLoc {
    pub const IDENTITY: MinLoc = MinLoc {
        val: f64::INFINITY,
        loc: usize::MAX,
    };

    pub fn combine(self, other: MinLoc) -> MinLoc {
        if other.val < self.val || (other.val == self.val && other.loc < self.loc) {
            other
        } else {
            self
        }
    }
}

const F64: usize = std::mem::size_of::<f64>();

/// Location of the first minimum of `x`.
pub struct FirstMin {
    desc: KernelDescriptor,
    arrays: ArraySet,
    minloc: usize,
}

impl FirstMin {
    const X: usize = 0;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = KernelDescriptor::new("Lcals", "FIRST_MIN")
            .with_default_size(1_000_000)
            .with_default_reps(100)
            .with_all_variants()
            .with_gpu_block_sizes(vec![128, 256]);
        desc.configure(params);
        let n = desc.actual_size();
        desc.set_costs(KernelCosts::new(F64 * n, 0).with_its(n));
        Self {
            desc,
            arrays: ArraySet::default(),
            minloc: 0,
        }
    }
}

impl Kernel for FirstMin {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn supports_tuning(&self, variant: VariantId, tuning: &Tuning) -> bool {
        supports_tree_reduction(variant, tuning)
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.desc.actual_size();
        let mut x = DataInit::new().random(n);
        x[n / 2] = -1.0e10;
        self.arrays.push(x, &space)?;
        self.minloc = 0;
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let step = ReduceStep::new(
            self.desc.actual_size(),
            [Self::X],
            MinLoc::IDENTITY,
            |i, v| MinLoc {
                val: v[0][i],
                loc: i,
            },
            MinLoc::combine,
        )
        .with_tree_reduction();

        let target = ExecTarget::resolve(variant, tuning, ctx)?;
        let (arrays, minloc) = (&self.arrays, &mut self.minloc);
        timed_reps(&mut ctx.timer, target.device(), self.desc.run_reps(), |_| {
            let found = target.reduce(arrays, &step)?;
            *minloc = (*minloc).max(found.loc);
            Ok(())
        })
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        Ok(self.minloc as f64)
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}
