//! The immutable [`JobResult`] record written at job completion (§3).

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::quality::Scorecard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
}

/// Wall-clock duration of one orchestrator stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration: Duration,
}

/// Per-external-service cost incurred while producing this job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub by_service: HashMap<String, Decimal>,
}

impl CostBreakdown {
    pub fn total(&self) -> Decimal {
        self.by_service.values().sum()
    }

    pub fn add(&mut self, service: impl Into<String>, amount: Decimal) {
        *self.by_service.entry(service.into()).or_default() += amount;
    }
}

/// Immutable record written once a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub outcome: Outcome,
    pub artifact_paths: Vec<String>,
    pub scorecard: Option<Scorecard>,
    pub stage_timings: Vec<StageTiming>,
    pub cost: CostBreakdown,
    pub error_chain: Vec<String>,
}

impl JobResult {
    pub fn wall_clock(&self) -> Duration {
        self.stage_timings.iter().map(|s| s.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_breakdown_sums_across_services() {
        let mut cost = CostBreakdown::default();
        cost.add("vision-critique", Decimal::new(150, 2));
        cost.add("serverless-pdf", Decimal::new(50, 2));
        assert_eq!(cost.total(), Decimal::new(200, 2));
    }

    #[test]
    fn wall_clock_is_sum_of_stage_timings() {
        let result = JobResult {
            job_id: "j1".into(),
            outcome: Outcome::Success,
            artifact_paths: vec![],
            scorecard: None,
            stage_timings: vec![
                StageTiming {
                    stage: "route".into(),
                    duration: Duration::from_millis(10),
                },
                StageTiming {
                    stage: "gate".into(),
                    duration: Duration::from_millis(20),
                },
            ],
            cost: CostBreakdown::default(),
            error_chain: vec![],
        };
        assert_eq!(result.wall_clock(), Duration::from_millis(30));
    }
}
