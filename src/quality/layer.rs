//! The quality-layer contract (§4.6 "Layer contract").

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::PipelineError;
use crate::ticket::JobTicket;

/// Maps a layer's native score onto the common [0,1] scale the scorecard
/// aggregates over (§9 open question: ordinal vs. real scale mapping).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleMapper {
    /// The layer already reports in [0,1]; used as-is.
    Unit,
    /// The layer reports an integer rubric score out of `max` (e.g. the
    /// structural validator's 0-150 scale).
    Ordinal { max: f64 },
}

impl ScaleMapper {
    pub fn normalize(&self, raw_score: f64) -> f64 {
        match self {
            ScaleMapper::Unit => raw_score.clamp(0.0, 1.0),
            ScaleMapper::Ordinal { max } => (raw_score / max).clamp(0.0, 1.0),
        }
    }
}

/// The outcome of running one layer against an artifact (§3 `ScorecardLayer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer_id: String,
    pub enabled: bool,
    pub raw_score: f64,
    pub normalized_score: f64,
    pub passed: bool,
    pub threshold_used: f64,
    pub raw_report_path: Option<PathBuf>,
    pub duration: Duration,
}

/// One stage of the pipeline. Implementors must not mutate the artifact
/// in place (§4.6 "Determinism") — a remediation layer instead returns a
/// new artifact path via [`LayerReport::raw_report_path`] semantics
/// specific to that layer, and the pipeline re-validates from there.
#[async_trait]
pub trait QualityLayer: Send + Sync {
    fn id(&self) -> &str;

    fn scale(&self) -> ScaleMapper;

    /// Whether this layer participates given the ticket's feature flags
    /// and quality tier. A pure function of config and ticket, never the
    /// artifact, so enablement is testable without running anything.
    fn enabled(&self, ticket: &JobTicket, config: &Config) -> bool;

    /// Run the layer against `artifact_path`, scoring it on this layer's
    /// native scale. `threshold` is the already-resolved min-score for
    /// this layer (tier default, overridden per `qa.thresholds` if set).
    async fn run(
        &self,
        artifact_path: &std::path::Path,
        ticket: &JobTicket,
        threshold: f64,
    ) -> Result<LayerReport, PipelineError>;
}
