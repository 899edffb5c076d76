//! Aggregate statistics over job history (§6 AMBIENT), used by the
//! `orchestrate status` CLI command and the `--error-rate` gate.

use rust_decimal::Decimal;

use crate::ticket::{JobResult, Outcome};

/// Statistics rolled up across a window of job results.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JobStats {
    pub total_jobs: u64,
    pub succeeded_jobs: u64,
    pub failed_jobs: u64,
    pub skipped_jobs: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub total_cost: Decimal,
    pub avg_wall_clock_secs: f64,
}

impl JobStats {
    /// Compute stats over an already-fetched window of results (typically
    /// `HistoryStore::list_recent`'s output).
    pub fn from_results(results: &[JobResult]) -> Self {
        let total = results.len() as u64;
        if total == 0 {
            return Self::default();
        }

        let succeeded = results
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .count() as u64;
        let failed = results
            .iter()
            .filter(|r| r.outcome == Outcome::Failure)
            .count() as u64;
        let skipped = total - succeeded - failed;

        let total_cost: Decimal = results.iter().map(|r| r.cost.total()).sum();
        let total_wall_clock_secs: f64 = results
            .iter()
            .map(|r| r.wall_clock().as_secs_f64())
            .sum();

        Self {
            total_jobs: total,
            succeeded_jobs: succeeded,
            failed_jobs: failed,
            skipped_jobs: skipped,
            success_rate: succeeded as f64 / total as f64,
            error_rate: failed as f64 / total as f64,
            total_cost,
            avg_wall_clock_secs: total_wall_clock_secs / total as f64,
        }
    }
}
