//! Scorecard aggregation across pipeline layers (§3 `ScorecardLayer`).

use serde::{Deserialize, Serialize};

use crate::quality::layer::LayerReport;

/// The full report for one job's quality gate run, in pipeline order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scorecard {
    pub layers: Vec<LayerReport>,
}

impl Scorecard {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push(&mut self, report: LayerReport) {
        self.layers.push(report);
    }

    /// All enabled layers pass — does not itself check the aggregate
    /// against the tier threshold; see [`Scorecard::aggregate`].
    pub fn all_enabled_layers_passed(&self) -> bool {
        self.layers.iter().filter(|l| l.enabled).all(|l| l.passed)
    }

    /// The weighted mean of enabled layers' normalized scores. Every
    /// enabled layer contributes equally; layers report on whatever
    /// native scale they use but are normalized via their `ScaleMapper`
    /// before reaching this point (§9 open question resolution).
    pub fn aggregate(&self) -> f64 {
        let enabled: Vec<&LayerReport> = self.layers.iter().filter(|l| l.enabled).collect();
        if enabled.is_empty() {
            return 0.0;
        }
        let sum: f64 = enabled.iter().map(|l| l.normalized_score).sum();
        sum / enabled.len() as f64
    }

    /// Pass = all enabled layers individually pass AND the aggregate
    /// meets or exceeds `tier_threshold` (§4.6 "Thresholds").
    pub fn passes(&self, tier_threshold: f64) -> bool {
        self.all_enabled_layers_passed() && self.aggregate() >= tier_threshold
    }

    /// The first failing enabled layer, in pipeline order, used to report
    /// `VALIDATION_FAILED` with the layer id and shortfall (§4.6).
    pub fn first_failure(&self) -> Option<&LayerReport> {
        self.layers.iter().filter(|l| l.enabled).find(|l| !l.passed)
    }
}

impl Default for Scorecard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn layer(id: &str, score: f64, passed: bool, enabled: bool) -> LayerReport {
        LayerReport {
            layer_id: id.to_string(),
            enabled,
            raw_score: score,
            normalized_score: score,
            passed,
            threshold_used: 0.9,
            raw_report_path: None,
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn aggregate_ignores_disabled_layers() {
        let mut card = Scorecard::new();
        card.push(layer("l1", 1.0, true, true));
        card.push(layer("l2", 0.0, false, false));
        assert_eq!(card.aggregate(), 1.0);
    }

    #[test]
    fn passes_requires_both_layer_pass_and_aggregate_threshold() {
        let mut card = Scorecard::new();
        card.push(layer("l1", 0.97, true, true));
        card.push(layer("l2", 0.93, true, true));
        assert!(card.passes(0.95));
        assert!(!card.passes(0.96));
    }

    #[test]
    fn a_single_failing_layer_fails_the_card_even_if_aggregate_is_high() {
        let mut card = Scorecard::new();
        card.push(layer("l1", 1.0, true, true));
        card.push(layer("l2", 0.4, false, true));
        assert!(!card.passes(0.5));
        assert_eq!(card.first_failure().unwrap().layer_id, "l2");
    }

    #[test]
    fn empty_scorecard_has_zero_aggregate_and_fails_any_positive_threshold() {
        let card = Scorecard::new();
        assert_eq!(card.aggregate(), 0.0);
        assert!(!card.passes(0.1));
    }
}
