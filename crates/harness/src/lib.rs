//! Sweep executor, run records and reports for perfsweep.

#[cfg(feature = "cli")]
pub mod cli;
pub mod executor;
pub mod record;
pub mod report;

pub use executor::{Executor, PlannedRun};
pub use record::{FailureStage, Outcome, RunRecord, Warning};
pub use report::SweepReport;
