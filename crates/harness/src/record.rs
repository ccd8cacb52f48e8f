//! Outcome of one (kernel, variant, tuning) combination.

use perfsweep_kernels::{KernelCosts, Tuning, VariantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    SetUp,
    Run,
    Checksum,
    TearDown,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::SetUp => "set_up",
            FailureStage::Run => "run",
            FailureStage::Checksum => "checksum",
            FailureStage::TearDown => "tear_down",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    SkippedUnsupported,
    Failed { stage: FailureStage, reason: String },
}

/// Correctness or protocol issues that do not fail a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    ChecksumDivergence {
        reference_variant: VariantId,
        reference_tuning: String,
        reference: f64,
        value: f64,
    },
    /// The device still had queued work when `run_variant` returned.
    UnsynchronizedDevice { pass: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub kernel: String,
    pub variant: VariantId,
    pub tuning: Tuning,
    pub outcome: Outcome,
    /// Summed over passes.
    pub elapsed_secs: f64,
    pub min_pass_secs: f64,
    pub max_pass_secs: f64,
    pub passes: usize,
    /// Repetitions per pass.
    pub reps: usize,
    /// Summed over passes.
    pub checksum: f64,
    pub costs: KernelCosts,
    pub warnings: Vec<Warning>,
}

impl RunRecord {
    pub fn new(
        kernel: impl Into<String>,
        variant: VariantId,
        tuning: Tuning,
        reps: usize,
        costs: KernelCosts,
    ) -> Self {
        Self {
            kernel: kernel.into(),
            variant,
            tuning,
            outcome: Outcome::Completed,
            elapsed_secs: 0.0,
            min_pass_secs: 0.0,
            max_pass_secs: 0.0,
            passes: 0,
            reps,
            checksum: 0.0,
            costs,
            warnings: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::SkippedUnsupported)
    }

    pub(crate) fn add_pass(&mut self, elapsed: Duration, checksum: f64) {
        let secs = elapsed.as_secs_f64();
        if self.passes == 0 {
            self.min_pass_secs = secs;
            self.max_pass_secs = secs;
        } else {
            self.min_pass_secs = self.min_pass_secs.min(secs);
            self.max_pass_secs = self.max_pass_secs.max(secs);
        }
        self.elapsed_secs += secs;
        self.checksum = checksum;
        self.passes += 1;
    }

    pub(crate) fn fail(&mut self, stage: FailureStage, reason: String) {
        self.outcome = Outcome::Failed { stage, reason };
    }

    pub fn time_per_rep_secs(&self) -> f64 {
        let reps = (self.passes * self.reps) as f64;
        if reps > 0.0 {
            self.elapsed_secs / reps
        } else {
            0.0
        }
    }

    pub fn bandwidth_gbs(&self) -> f64 {
        per_second(self.costs.bytes_per_rep, self.time_per_rep_secs()) / 1.0e9
    }

    pub fn gflops(&self) -> f64 {
        per_second(self.costs.flops_per_rep, self.time_per_rep_secs()) / 1.0e9
    }
}

fn per_second(amount: usize, secs: f64) -> f64 {
    if secs > 0.0 {
        amount as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn record() -> RunRecord {
        RunRecord::new(
            "Stream_MUL",
            VariantId::BaseSeq,
            Tuning::host_default(),
            10,
            KernelCosts::new(16_000, 1_000),
        )
    }

    #[test]
    fn passes_track_min_max_and_throughput() {
        let mut rec = record();
        rec.add_pass(Duration::from_millis(20), 1.0);
        rec.add_pass(Duration::from_millis(10), 2.0);

        assert_eq!(rec.passes, 2);
        assert_abs_diff_eq!(rec.elapsed_secs, 0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(rec.min_pass_secs, 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(rec.max_pass_secs, 0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(rec.time_per_rep_secs(), 0.0015, epsilon = 1e-12);
        assert_abs_diff_eq!(
            rec.bandwidth_gbs(),
            16_000.0 / 0.0015 / 1.0e9,
            epsilon = 1e-9
        );
        assert_eq!(rec.checksum, 2.0);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let mut rec = record();
        rec.fail(FailureStage::SetUp, "out of memory".into());
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["stage"], "SetUp");
        assert_eq!(json["variant"], "Base_Seq");
        assert!(rec.is_failed());
    }
}
