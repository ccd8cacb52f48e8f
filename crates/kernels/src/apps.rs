//! Application-derived kernels.

use crate::checksum::calc_checksum;
use crate::config::RunParams;
use crate::context::RunContext;
use crate::data::{ArraySet, DataInit};
use crate::descriptor::{KernelCosts, KernelDescriptor};
use crate::exec::{run_map_steps, MapStep};
use crate::kernel::Kernel;
use crate::tuning::Tuning;
use crate::variant::VariantId;
use anyhow::Result;

const P_CUT: f64 = 1.0e-7;
const PMIN: f64 = 1.0e-7;
const EOSVMAX: f64 = 1.0e9;

/// Equation-of-state pressure update with cutoff and floor.
pub struct Pressure {
    desc: KernelDescriptor,
    arrays: ArraySet,
    cls: f64,
}

impl Pressure {
    const COMPRESSION: usize = 0;
    const BVC: usize = 1;
    const P_NEW: usize = 2;
    const E_OLD: usize = 3;
    const VNEWC: usize = 4;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = KernelDescriptor::new("Apps", "PRESSURE")
            .with_default_size(1_000_000)
            .with_default_reps(700)
            .with_all_variants()
            .with_offload_team_size(256);
        desc.configure(params);
        let n = desc.actual_size();
        let f64_bytes = std::mem::size_of::<f64>();
        desc.set_costs(
            KernelCosts::new((2 + 4) * f64_bytes * n, 3 * n)
                .with_its(n)
                .with_kernels(2),
        );
        Self {
            desc,
            arrays: ArraySet::default(),
            cls: 0.0,
        }
    }
}

impl Kernel for Pressure {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.desc.actual_size();
        let mut init = DataInit::new();
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.constant(n, 0.0), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.cls = init.scalar();
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let cls = self.cls;
        let steps = [
            MapStep::new(Self::BVC, [Self::COMPRESSION], move |i, v| {
                cls * (v[0][i] + 1.0)
            }),
            MapStep::new(Self::P_NEW, [Self::BVC, Self::E_OLD, Self::VNEWC], |i, v| {
                let (bvc, e_old, vnewc) = (v[0], v[1], v[2]);
                let mut p = bvc[i] * e_old[i];
                if p.abs() < P_CUT || vnewc[i] >= EOSVMAX {
                    p = 0.0;
                }
                p.max(PMIN)
            }),
        ];
        run_map_steps(
            variant,
            tuning,
            ctx,
            self.desc.run_reps(),
            &mut self.arrays,
            &steps,
        )
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        let scale = self.desc.checksum_scale_factor();
        Ok(calc_checksum(self.arrays.sync_to_host(Self::P_NEW)?, scale))
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checksums_by_variant, small_params, test_context};
    use crate::tuning::TuningCatalog;
    use approx::assert_relative_eq;

    #[test]
    fn variants_agree() {
        let params = small_params(2048, 3);
        let sums = checksums_by_variant(&mut Pressure::new(&params), &params);
        let reference = sums[0].1;
        assert!(reference > 0.0);
        for (_, sum) in &sums {
            assert_relative_eq!(*sum, reference, max_relative = 1e-12);
        }
    }

    #[test]
    fn set_up_is_idempotent() {
        let params = small_params(300, 1);
        let mut kernel = Pressure::new(&params);
        let mut ctx = test_context(&params);

        let snapshot = |kernel: &Pressure| -> Vec<Vec<f64>> {
            (0..kernel.arrays.len())
                .map(|k| kernel.arrays.host(k).unwrap().to_vec())
                .collect()
        };

        kernel.set_up(VariantId::BaseGpuA, &mut ctx).unwrap();
        let first = (snapshot(&kernel), kernel.cls);
        kernel.tear_down(VariantId::BaseGpuA, &mut ctx).unwrap();
        kernel.set_up(VariantId::BaseGpuA, &mut ctx).unwrap();
        let second = (snapshot(&kernel), kernel.cls);
        kernel.tear_down(VariantId::BaseGpuA, &mut ctx).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn offload_uses_team_size() {
        let params = small_params(64, 1);
        let kernel = Pressure::new(&params);
        let candidates = TuningCatalog::new(&params)
            .candidates_for(&kernel, VariantId::BaseOffload);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].block_size, Some(256));
        assert_eq!(candidates[0].name, "block_256");
    }
}
