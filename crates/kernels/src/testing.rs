//! Helpers shared by kernel unit tests.

use crate::config::RunParams;
use crate::context::RunContext;
use crate::kernel::Kernel;
use crate::tuning::TuningCatalog;
use crate::variant::VariantId;

pub fn small_params(size: usize, reps: usize) -> RunParams {
    RunParams {
        size: Some(size),
        reps: Some(reps),
        threads: 3,
        ..RunParams::default()
    }
}

pub fn test_context(params: &RunParams) -> RunContext {
    RunContext::new(params).expect("test context")
}

/// Runs every defined, compiled variant once with its default tuning and
/// returns the checksums in variant order.
pub fn checksums_by_variant(kernel: &mut dyn Kernel, params: &RunParams) -> Vec<(VariantId, f64)> {
    let mut ctx = test_context(params);
    let catalog = TuningCatalog::new(params);
    let mut sums = Vec::new();

    for variant in VariantId::ALL {
        if !kernel.descriptor().defines(variant) || !variant.backend().is_compiled() {
            continue;
        }
        let tuning = catalog.candidates_for(kernel, variant).remove(0);
        assert!(
            catalog.is_supported(kernel, variant, &tuning, &ctx.devices),
            "{variant} default tuning unsupported"
        );

        kernel.set_up(variant, &mut ctx).expect("set_up");
        kernel
            .run_variant(variant, &tuning, &mut ctx)
            .unwrap_or_else(|err| panic!("{variant}: {err:#}"));
        let sum = kernel.update_checksum(variant, &mut ctx).expect("checksum");
        kernel.tear_down(variant, &mut ctx).expect("tear_down");
        sums.push((variant, sum));
    }

    for backend in crate::variant::Backend::ALL {
        if let Some(device) = ctx.devices.get(backend) {
            assert_eq!(device.allocated_bytes(), 0, "{backend:?} leaked memory");
        }
    }
    sums
}
