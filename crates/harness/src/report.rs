//! Sweep results and their text and JSON renderings.

use crate::record::{Outcome, RunRecord, Warning};
use anyhow::{Context, Result};
use perfsweep_kernels::RunParams;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub generated_at_unix_ms: u128,
    pub params: RunParams,
    /// In execution order.
    pub records: Vec<RunRecord>,
}

impl SweepReport {
    pub fn new(params: RunParams, records: Vec<RunRecord>) -> Self {
        let generated_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_millis();
        Self {
            generated_at_unix_ms,
            params,
            records,
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(|record| record.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter().filter(|record| record.is_failed())
    }

    pub fn records_for<'a>(&'a self, kernel: &'a str) -> impl Iterator<Item = &'a RunRecord> {
        self.records
            .iter()
            .filter(move |record| record.kernel.eq_ignore_ascii_case(kernel))
    }

    pub fn has_warnings(&self) -> bool {
        self.records.iter().any(|record| !record.warnings.is_empty())
    }

    /// One line per record with timing and derived throughput.
    pub fn summary_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<18} {:<18} {:<11} {:>13} {:>10} {:>10} {:>22}  {}",
            "kernel", "variant", "tuning", "time/rep(s)", "GB/s", "GFLOP/s", "checksum", "status"
        );
        for record in &self.records {
            let status = match &record.outcome {
                Outcome::Completed => "ok".to_string(),
                Outcome::SkippedUnsupported => "skipped (unsupported)".to_string(),
                Outcome::Failed { stage, reason } => format!("failed in {stage}: {reason}"),
            };
            if record.is_completed() {
                let _ = writeln!(
                    out,
                    "{:<18} {:<18} {:<11} {:>13.6e} {:>10.3} {:>10.3} {:>22.12e}  {}",
                    record.kernel,
                    record.variant,
                    record.tuning.name,
                    record.time_per_rep_secs(),
                    record.bandwidth_gbs(),
                    record.gflops(),
                    record.checksum,
                    status
                );
            } else {
                let _ = writeln!(
                    out,
                    "{:<18} {:<18} {:<11} {:>13} {:>10} {:>10} {:>22}  {}",
                    record.kernel, record.variant, record.tuning.name, "-", "-", "-", "-", status
                );
            }
        }
        out
    }

    /// Checksum agreement per kernel; lists every divergence warning.
    pub fn checksum_report(&self) -> String {
        let mut out = String::new();
        let mut kernels: Vec<&str> = Vec::new();
        for record in &self.records {
            if !kernels.contains(&record.kernel.as_str()) {
                kernels.push(&record.kernel);
            }
        }

        for kernel in kernels {
            let completed = self
                .records_for(kernel)
                .filter(|record| record.is_completed())
                .count();
            let diverged: Vec<&RunRecord> = self
                .records_for(kernel)
                .filter(|record| {
                    record
                        .warnings
                        .iter()
                        .any(|warning| matches!(warning, Warning::ChecksumDivergence { .. }))
                })
                .collect();

            let verdict = if completed == 0 {
                "no completed runs"
            } else if diverged.is_empty() {
                "checksums agree"
            } else {
                "checksums DIVERGE"
            };
            let _ = writeln!(out, "{kernel}: {verdict} ({completed} completed)");

            for record in diverged {
                for warning in &record.warnings {
                    if let Warning::ChecksumDivergence {
                        reference_variant,
                        reference_tuning,
                        reference,
                        value,
                    } = warning
                    {
                        let _ = writeln!(
                            out,
                            "  {} {}: {:.12e} vs {} {}: {:.12e} (diff {:.3e})",
                            record.variant,
                            record.tuning.name,
                            value,
                            reference_variant,
                            reference_tuning,
                            reference,
                            value - reference
                        );
                    }
                }
            }
        }
        out
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep report {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse sweep report {}", path.display()))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)
            .with_context(|| format!("failed to write sweep report {}", path.display()))?;
        Ok(())
    }
}
