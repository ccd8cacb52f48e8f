//! Stream group: bandwidth-bound vector kernels.

use crate::checksum::calc_checksum;
use crate::config::RunParams;
use crate::context::RunContext;
use crate::data::{ArraySet, DataInit};
use crate::descriptor::{KernelCosts, KernelDescriptor};
use crate::exec::{run_map_steps, ExecTarget, MapStep, ReduceStep};
use crate::kernel::Kernel;
use crate::tuning::Tuning;
use crate::utils::timed_reps;
use crate::variant::VariantId;
use anyhow::Result;

const GROUP: &str = "Stream";
const F64: usize = std::mem::size_of::<f64>();

fn stream_descriptor(name: &'static str, reps: usize, params: &RunParams) -> KernelDescriptor {
    let mut desc = KernelDescriptor::new(GROUP, name)
        .with_default_size(1_000_000)
        .with_default_reps(reps)
        .with_all_variants();
    desc.configure(params);
    desc
}

/// `b[i] = alpha * c[i]`
pub struct StreamMul {
    desc: KernelDescriptor,
    arrays: ArraySet,
    alpha: f64,
}

impl StreamMul {
    const B: usize = 0;
    const C: usize = 1;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = stream_descriptor("MUL", 1800, params);
        let n = desc.actual_size();
        desc.set_costs(KernelCosts::new(2 * F64 * n, n).with_its(n));
        Self {
            desc,
            arrays: ArraySet::default(),
            alpha: 0.0,
        }
    }
}

impl Kernel for StreamMul {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.desc.actual_size();
        let mut init = DataInit::new();
        self.arrays.push(init.constant(n, 0.0), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.alpha = init.scalar();
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let alpha = self.alpha;
        let step = MapStep::new(Self::B, [Self::C], move |i, v| alpha * v[0][i]);
        run_map_steps(
            variant,
            tuning,
            ctx,
            self.desc.run_reps(),
            &mut self.arrays,
            &[step],
        )
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        let scale = self.desc.checksum_scale_factor();
        Ok(calc_checksum(self.arrays.sync_to_host(Self::B)?, scale))
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

/// `c[i] = a[i] + b[i]`
pub struct StreamAdd {
    desc: KernelDescriptor,
    arrays: ArraySet,
}

impl StreamAdd {
    const A: usize = 0;
    const B: usize = 1;
    const C: usize = 2;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = stream_descriptor("ADD", 1100, params);
        let n = desc.actual_size();
        desc.set_costs(KernelCosts::new(3 * F64 * n, n).with_its(n));
        Self {
            desc,
            arrays: ArraySet::default(),
        }
    }
}

impl Kernel for StreamAdd {
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
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let step = MapStep::new(Self::C, [Self::A, Self::B], |i, v| v[0][i] + v[1][i]);
        run_map_steps(
            variant,
            tuning,
            ctx,
            self.desc.run_reps(),
            &mut self.arrays,
            &[step],
        )
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        let scale = self.desc.checksum_scale_factor();
        Ok(calc_checksum(self.arrays.sync_to_host(Self::C)?, scale))
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

/// `a[i] = b[i] + alpha * c[i]`
pub struct StreamTriad {
    desc: KernelDescriptor,
    arrays: ArraySet,
    alpha: f64,
}

impl StreamTriad {
    const A: usize = 0;
    const B: usize = 1;
    const C: usize = 2;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = stream_descriptor("TRIAD", 1000, params);
        let n = desc.actual_size();
        desc.set_costs(KernelCosts::new(3 * F64 * n, 2 * n).with_its(n));
        Self {
            desc,
            arrays: ArraySet::default(),
            alpha: 0.0,
        }
    }
}

impl Kernel for StreamTriad {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.desc.actual_size();
        let mut init = DataInit::new();
        self.arrays.push(init.constant(n, 0.0), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.alpha = init.scalar();
        Ok(())
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: &Tuning,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let alpha = self.alpha;
        let step = MapStep::new(Self::A, [Self::B, Self::C], move |i, v| {
            v[0][i] + alpha * v[1][i]
        });
        run_map_steps(
            variant,
            tuning,
            ctx,
            self.desc.run_reps(),
            &mut self.arrays,
            &[step],
        )
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        let scale = self.desc.checksum_scale_factor();
        Ok(calc_checksum(self.arrays.sync_to_host(Self::A)?, scale))
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

/// `dot = Σ a[i] * b[i]`, summed over repetitions.
pub struct StreamDot {
    desc: KernelDescriptor,
    arrays: ArraySet,
    dot: f64,
}

impl StreamDot {
    const A: usize = 0;
    const B: usize = 1;

    pub fn new(params: &RunParams) -> Self {
        let mut desc = stream_descriptor("DOT", 2000, params);
        let n = desc.actual_size();
        desc.set_costs(KernelCosts::new(2 * F64 * n, 2 * n).with_its(n));
        Self {
            desc,
            arrays: ArraySet::default(),
            dot: 0.0,
        }
    }
}

impl Kernel for StreamDot {
    fn descriptor(&self) -> &KernelDescriptor {
        &self.desc
    }

    fn set_up(&mut self, variant: VariantId, ctx: &mut RunContext) -> Result<()> {
        let space = ctx.data_space(variant)?;
        let n = self.desc.actual_size();
        let mut init = DataInit::new();
        self.arrays.push(init.values(n), &space)?;
        self.arrays.push(init.values(n), &space)?;
        self.dot = 0.0;
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
            [Self::A, Self::B],
            0.0,
            |i, v| v[0][i] * v[1][i],
            |x, y| x + y,
        );
        let target = ExecTarget::resolve(variant, tuning, ctx)?;
        let (arrays, dot) = (&self.arrays, &mut self.dot);
        timed_reps(&mut ctx.timer, target.device(), self.desc.run_reps(), |_| {
            *dot += target.reduce(arrays, &step)?;
            Ok(())
        })
    }

    fn update_checksum(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<f64> {
        Ok(self.dot)
    }

    fn tear_down(&mut self, _variant: VariantId, _ctx: &mut RunContext) -> Result<()> {
        self.arrays.release_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checksums_by_variant, small_params};
    use approx::assert_relative_eq;

    #[test]
    fn mul_variants_agree() {
        let params = small_params(1000, 3);
        let sums = checksums_by_variant(&mut StreamMul::new(&params), &params);
        assert_eq!(sums.len(), VariantId::ALL.len());
        let reference = sums[0].1;
        for (variant, sum) in &sums {
            assert_relative_eq!(*sum, reference, max_relative = 1e-12);
            assert!(sum.is_finite(), "{variant}");
        }
    }

    #[test]
    fn add_and_triad_agree() {
        let params = small_params(777, 2);
        for sums in [
            checksums_by_variant(&mut StreamAdd::new(&params), &params),
            checksums_by_variant(&mut StreamTriad::new(&params), &params),
        ] {
            let reference = sums[0].1;
            assert!(reference > 0.0);
            for (_, sum) in &sums {
                assert_relative_eq!(*sum, reference, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn dot_matches_closed_form_and_accumulates_reps() {
        let params = small_params(100, 4);
        let mut init = DataInit::new();
        let a = init.values(100);
        let b = init.values(100);
        let expected: f64 = 4.0 * a.iter().zip(&b).map(|(x, y)| x * y).sum::<f64>();

        for (_, sum) in checksums_by_variant(&mut StreamDot::new(&params), &params) {
            assert_relative_eq!(sum, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn costs_follow_actual_size() {
        let kernel = StreamTriad::new(&small_params(500, 1));
        let costs = kernel.costs();
        assert_eq!(costs.bytes_per_rep, 24 * 500);
        assert_eq!(costs.flops_per_rep, 1000);
        assert_eq!(kernel.descriptor().full_name(), "Stream_TRIAD");
    }
}
