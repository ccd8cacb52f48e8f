//! Polybench linear algebra kernels.

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

const N_DEFAULT: usize = 1000;

/// `y = Aᵀ (A x)` for a dense `N × N` matrix, with `N = ⌈√target⌉`.
pub struct Atax {
    desc: KernelDescriptor,
    arrays: ArraySet,
    n: usize,
}

impl Atax {
    const TMP: usize = 0;
    const X: usize = 1;
    const Y: usize = 2;
    const A: usize = 3;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = KernelDescriptor::new("Polybench", "ATAX")
            .with_default_size(N_DEFAULT * N_DEFAULT)
            .with_default_reps(100)
            .with_all_variants();
        desc.configure(params);

        let n = (desc.target_size() as f64).sqrt().ceil() as usize;
        desc.set_actual_size(n * n);
        let f64_bytes = std::mem::size_of::<f64>();
        desc.set_costs(
            KernelCosts::new(2 * f64_bytes * n * n + 4 * f64_bytes * n, 4 * n * n)
                .with_its(2 * n)
                .with_kernels(2),
        );
        desc.set_checksum_scale_factor(
            0.001 * (desc.default_size() as f64 / desc.actual_size() as f64),
        );

        Self {
            desc,
            arrays: ArraySet::default(),
            n,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }
}

impl Kernel for Atax {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.n;
        let mut init = DataInit::new();
        self.arrays.push(init.constant(n, 0.0), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.constant(n, 0.0), &space)?;
        self.arrays.push(init.values(n * n), &space)?;
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let n = self.n;
        let steps = [
            MapStep::new(Self::TMP, [Self::A, Self::X], move |i, v| {
                let (a, x) = (v[0], v[1]);
                let row = &a[i * n..(i + 1) * n];
                row.iter().zip(x).map(|(aij, xj)| aij * xj).sum()
            }),
            MapStep::new(Self::Y, [Self::A, Self::TMP], move |j, v| {
                let (a, tmp) = (v[0], v[1]);
                (0..n).map(|i| a[i * n + j] * tmp[i]).sum()
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
        Ok(calc_checksum(self.arrays.sync_to_host(Self::Y)?, scale))
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checksums_by_variant, small_params, test_context};
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2};

    #[test]
    fn problem_size_is_square_of_ceil_sqrt() {
        let kernel = Atax::new(&small_params(1000, 1));
        assert_eq!(kernel.n(), 32);
        assert_eq!(kernel.descriptor().actual_size(), 1024);
        assert_eq!(kernel.costs().flops_per_rep, 4 * 1024);
    }

    #[test]
    fn matches_dense_reference() {
        let params = small_params(400, 1);
        let mut kernel = Atax::new(&params);
        let n = kernel.n();
        let mut ctx = test_context(&params);

        kernel.set_up(VariantId::BaseSeq, &mut ctx).unwrap();
        kernel
            .run_variant(VariantId::BaseSeq, &Tuning::host_default(), &mut ctx)
            .unwrap();
        let y = kernel.arrays.host(Atax::Y).unwrap().to_vec();
        kernel.tear_down(VariantId::BaseSeq, &mut ctx).unwrap();

        let mut init = DataInit::new();
        init.constant(n, 0.0);
        let x = Array1::from(init.values(n));
        init.constant(n, 0.0);
        let a = Array2::from_shape_vec((n, n), init.values(n * n)).unwrap();
        let expected = a.t().dot(&a.dot(&x));

        for (got, want) in y.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, max_relative = 1e-12);
        }
    }

    #[test]
    fn variants_agree() {
        let params = small_params(900, 2);
        let sums = checksums_by_variant(&mut Atax::new(&params), &params);
        let reference = sums[0].1;
        for (_, sum) in &sums {
            assert_relative_eq!(*sum, reference, max_relative = 1e-12);
        }
    }
}
