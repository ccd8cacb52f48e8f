//! The sweep executor.
//!
//! Walks kernels in registration order, variants in declared order and
//! tuning candidates in catalog order, running each supported combination
//! through the kernel lifecycle. A failing combination is recorded and the
//! sweep moves on; only invalid parameters abort a run.

use crate::record::{FailureStage, Outcome, RunRecord, Warning};
use crate::report::SweepReport;
use anyhow::{anyhow, Error, Result};
use perfsweep_kernels::{
    checksums_agree, ChecksumAccumulator, Kernel, KernelRegistry, RunContext, RunParams, Timer,
    Tuning, TuningCatalog, VariantId, VariantRegistry,
};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// One combination as it would run, for dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRun {
    pub kernel: String,
    pub variant: VariantId,
    pub tuning: Tuning,
    pub supported: bool,
}

pub struct Executor {
    params: RunParams,
    registry: KernelRegistry,
    ctx: RunContext,
    catalog: TuningCatalog,
    variants: VariantRegistry,
}

impl Executor {
    /// Default kernels and emulated devices configured from `params`.
    pub fn new(params: RunParams) -> Result<Self> {
        params.validate()?;
        let registry = KernelRegistry::with_default_kernels(&params);
        let ctx = RunContext::new(&params)?;
        Self::with_context(params, registry, ctx)
    }

    pub fn with_context(
        params: RunParams,
        mut registry: KernelRegistry,
        ctx: RunContext,
    ) -> Result<Self> {
        params.validate()?;
        registry.retain_selected(&params)?;
        let catalog = TuningCatalog::new(&params);
        let variants = VariantRegistry::new(&ctx.devices, &params);
        Ok(Self {
            params,
            registry,
            ctx,
            catalog,
            variants,
        })
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    pub fn variants(&self) -> &VariantRegistry {
        &self.variants
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn runnable(&self, kernel: &dyn Kernel, variant: VariantId) -> bool {
        VariantRegistry::is_defined(kernel, variant)
            && self.variants.is_available(variant)
            && self.variants.is_selected(variant)
    }

    /// Every combination a sweep would visit, without running anything.
    pub fn plan(&self) -> Vec<PlannedRun> {
        let mut planned = Vec::new();
        for kernel in self.registry.kernels() {
            let kernel = kernel.as_ref();
            for variant in VariantId::ALL {
                if !self.runnable(kernel, variant) {
                    continue;
                }
                for tuning in self.catalog.candidates_for(kernel, variant) {
                    let supported =
                        self.catalog
                            .is_supported(kernel, variant, &tuning, &self.ctx.devices);
                    planned.push(PlannedRun {
                        kernel: kernel.descriptor().full_name(),
                        variant,
                        tuning,
                        supported,
                    });
                }
            }
        }
        planned
    }

    pub fn run(&mut self) -> Result<SweepReport> {
        let mut records: Vec<RunRecord> = Vec::new();
        let mut checksums = ChecksumAccumulator::new();

        for pass in 0..self.params.npasses {
            info!(pass = pass + 1, of = self.params.npasses, "starting pass");
            let mut slot = 0;

            for index in 0..self.registry.len() {
                for variant in VariantId::ALL {
                    let kernel = self.registry.kernels()[index].as_ref();
                    if !VariantRegistry::is_defined(kernel, variant) {
                        continue;
                    }
                    if !self.runnable(kernel, variant) {
                        if pass == 0 {
                            debug!(
                                kernel = %kernel.descriptor().full_name(),
                                variant = %variant,
                                "variant not available or not selected"
                            );
                        }
                        continue;
                    }

                    for tuning in self.catalog.candidates_for(kernel, variant) {
                        let kernel = self.registry.kernels()[index].as_ref();
                        if pass == 0 {
                            let desc = kernel.descriptor();
                            records.push(RunRecord::new(
                                desc.full_name(),
                                variant,
                                tuning.clone(),
                                desc.run_reps(),
                                kernel.costs(),
                            ));
                        }
                        let record = &mut records[slot];
                        slot += 1;

                        if record.is_failed() {
                            continue;
                        }
                        if !self
                            .catalog
                            .is_supported(kernel, variant, &tuning, &self.ctx.devices)
                        {
                            record.outcome = Outcome::SkippedUnsupported;
                            if pass == 0 {
                                info!(
                                    kernel = %record.kernel,
                                    variant = %variant,
                                    tuning = %tuning.name,
                                    "tuning unsupported, skipping"
                                );
                            }
                            continue;
                        }

                        let kernel = self.registry.kernels_mut()[index].as_mut();
                        attempt(
                            kernel,
                            variant,
                            &tuning,
                            &mut self.ctx,
                            record,
                            &mut checksums,
                            pass,
                        );
                    }
                }
            }
        }

        validate_checksums(&mut records, self.params.checksum_tolerance);
        Ok(SweepReport::new(self.params.clone(), records))
    }
}

type StageError = (FailureStage, Error);

fn guarded<T>(stage: FailureStage, f: impl FnOnce() -> Result<T>) -> Result<T, StageError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err((stage, err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            Err((stage, anyhow!("panicked: {message}")))
        }
    }
}

/// A completed run leaves the timer stopped with time on it.
fn check_timer(timer: &mut Timer) -> Result<(), StageError> {
    let problem = if timer.is_running() {
        timer.stop();
        "run_variant returned with the timer still running"
    } else if timer.elapsed().is_zero() {
        "run_variant recorded no time"
    } else {
        return Ok(());
    };
    Err((FailureStage::Run, anyhow!(problem)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One pass of one combination: set_up, run, checksum, and a tear_down that
/// runs whatever happened before it.
fn attempt(
    kernel: &mut dyn Kernel,
    variant: VariantId,
    tuning: &Tuning,
    ctx: &mut RunContext,
    record: &mut RunRecord,
    checksums: &mut ChecksumAccumulator,
    pass: usize,
) {
    ctx.timer.reset();

    let mut result = guarded(FailureStage::SetUp, || kernel.set_up(variant, ctx))
        .and_then(|()| {
            guarded(FailureStage::Run, || {
                kernel.run_variant(variant, tuning, ctx)
            })
        })
        .and_then(|()| check_timer(&mut ctx.timer));

    if result.is_ok() {
        if let Some(device) = ctx.device_for(variant) {
            if !device.is_idle() {
                warn!(
                    kernel = %record.kernel,
                    variant = %variant,
                    tuning = %tuning.name,
                    "device still busy after run; timing excludes queued work"
                );
                record.warnings.push(Warning::UnsynchronizedDevice { pass });
            }
            // Drain before reading results back.
            result = device
                .synchronize()
                .map_err(|err| (FailureStage::Run, Error::from(err)));
        }
    }
    let elapsed = ctx.timer.elapsed();

    let checksum = result.and_then(|()| {
        guarded(FailureStage::Checksum, || {
            kernel.update_checksum(variant, ctx)
        })
    });

    if checksum.is_err() {
        // A failed run can leave launches queued; clear them and their
        // errors so the next combination starts from an idle device.
        if let Some(device) = ctx.device_for(variant) {
            let _ = device.synchronize();
        }
    }

    let teardown = guarded(FailureStage::TearDown, || kernel.tear_down(variant, ctx));

    let outcome = match (checksum, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(failure)) => Err(failure),
        (Err(failure), Ok(())) => Err(failure),
        (Err(failure), Err((_, teardown_err))) => {
            warn!(
                kernel = %record.kernel,
                variant = %variant,
                reason = %format!("{teardown_err:#}"),
                "tear_down failed after an earlier failure"
            );
            Err(failure)
        }
    };

    match outcome {
        Ok(value) => {
            let total = checksums.fold(&record.kernel, variant, &tuning.name, value);
            record.add_pass(elapsed, total);
            info!(
                kernel = %record.kernel,
                variant = %variant,
                tuning = %tuning.name,
                elapsed_ms = elapsed.as_secs_f64() * 1.0e3,
                checksum = total,
                "completed"
            );
        }
        Err((stage, err)) => {
            let reason = format!("{err:#}");
            warn!(
                kernel = %record.kernel,
                variant = %variant,
                tuning = %tuning.name,
                stage = %stage,
                reason = %reason,
                "combination failed"
            );
            record.fail(stage, reason);
        }
    }
}

/// Compares every completed record with the first completed record of the
/// same kernel.
fn validate_checksums(records: &mut [RunRecord], tolerance: f64) {
    let mut references: HashMap<String, (VariantId, String, f64)> = HashMap::new();

    for record in records.iter_mut().filter(|record| record.is_completed()) {
        let Some((ref_variant, ref_tuning, reference)) = references.get(&record.kernel).cloned()
        else {
            references.insert(
                record.kernel.clone(),
                (record.variant, record.tuning.name.clone(), record.checksum),
            );
            continue;
        };

        if !checksums_agree(record.checksum, reference, tolerance) {
            warn!(
                kernel = %record.kernel,
                variant = %record.variant,
                tuning = %record.tuning.name,
                reference_variant = %ref_variant,
                checksum = record.checksum,
                reference,
                "checksum diverges from reference"
            );
            record.warnings.push(Warning::ChecksumDivergence {
                reference_variant: ref_variant,
                reference_tuning: ref_tuning,
                reference,
                value: record.checksum,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfsweep_kernels::KernelCosts;

    fn completed(variant: VariantId, checksum: f64) -> RunRecord {
        let mut record = RunRecord::new(
            "Stream_MUL",
            variant,
            Tuning::host_default(),
            1,
            KernelCosts::default(),
        );
        record.add_pass(std::time::Duration::from_millis(1), checksum);
        record
    }

    #[test]
    fn divergence_is_measured_against_first_completed() {
        let mut skipped = completed(VariantId::BaseSeq, 0.0);
        skipped.outcome = Outcome::SkippedUnsupported;
        let mut records = vec![
            skipped,
            completed(VariantId::LambdaSeq, 100.0),
            completed(VariantId::LibrarySeq, 100.0 + 1.0e-9),
            completed(VariantId::BaseThreads, 100.1),
        ];

        validate_checksums(&mut records, 1.0e-10);

        assert!(records[1].warnings.is_empty());
        assert!(records[2].warnings.is_empty());
        assert!(matches!(
            records[3].warnings.as_slice(),
            [Warning::ChecksumDivergence {
                reference_variant: VariantId::LambdaSeq,
                ..
            }]
        ));
    }

    #[test]
    fn panics_become_stage_failures() {
        let err = guarded::<()>(FailureStage::Run, || panic!("boom")).unwrap_err();
        assert_eq!(err.0, FailureStage::Run);
        assert!(err.1.to_string().contains("boom"));
    }

    #[test]
    fn running_or_empty_timer_fails_the_run() {
        let mut timer = Timer::new();
        assert_eq!(check_timer(&mut timer).unwrap_err().0, FailureStage::Run);

        timer.start();
        let (stage, err) = check_timer(&mut timer).unwrap_err();
        assert_eq!(stage, FailureStage::Run);
        assert!(err.to_string().contains("still running"));
        assert!(!timer.is_running());
    }
}
