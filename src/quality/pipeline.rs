//! The quality gate pipeline runner (§4.6): runs the ordered layer list,
//! aggregates a [`Scorecard`], and supports re-validating from a given
//! layer forward after a remediation pass replaces the artifact.

use std::path::Path;

use crate::config::Config;
use crate::error::PipelineError;
use crate::quality::layer::QualityLayer;
use crate::quality::scorecard::Scorecard;
use crate::ticket::JobTicket;

/// An ordered, registered set of layers (§9 "layer registry"): built once
/// from config and ticket feature flags, so enablement is a pure
/// function testable without running any layer.
pub struct Pipeline {
    layers: Vec<Box<dyn QualityLayer>>,
}

impl Pipeline {
    pub fn new(layers: Vec<Box<dyn QualityLayer>>) -> Self {
        Self { layers }
    }

    /// Run every enabled layer in order, stopping early only on an
    /// infrastructure error (a content failure still records its report
    /// and continues, since the scorecard needs every layer's result).
    pub async fn run(
        &self,
        artifact_path: &Path,
        ticket: &JobTicket,
        config: &Config,
    ) -> Result<Scorecard, PipelineError> {
        self.run_from(0, artifact_path, ticket, config).await
    }

    /// Re-validate starting at `from_index`, reusing nothing from a prior
    /// run — used after a remediation layer has produced a new artifact
    /// and the pipeline must re-check everything from the affected layer
    /// forward (§4.6 "Determinism").
    pub async fn run_from(
        &self,
        from_index: usize,
        artifact_path: &Path,
        ticket: &JobTicket,
        config: &Config,
    ) -> Result<Scorecard, PipelineError> {
        let mut scorecard = Scorecard::new();

        for layer in self.layers.iter().skip(from_index) {
            let enabled = layer.enabled(ticket, config);
            if !enabled {
                continue;
            }

            let threshold = ticket
                .qa_layer_overrides
                .get(layer.id())
                .copied()
                .unwrap_or(ticket.effective_qa_threshold);

            let report = layer.run(artifact_path, ticket, threshold).await?;
            scorecard.push(report);
        }

        Ok(scorecard)
    }

    /// The index of `layer_id` in pipeline order, for a remediation layer
    /// to resume re-validation from the layer it affected.
    pub fn index_of(&self, layer_id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == layer_id)
    }
}

/// Build the canonical pipeline in §4.6 order. L0 runs before worker
/// dispatch and is therefore not part of this post-artifact pipeline.
pub fn canonical_pipeline(visual_baseline: Option<String>) -> Pipeline {
    use crate::quality::layers::{
        AccessibilityLayer, AiDesignAnalysisLayer, AiVisionCritiqueLayer, PixelGeometryLayer,
        StructuralLayer, VisualRegressionLayer,
    };

    Pipeline::new(vec![
        Box::new(StructuralLayer),
        Box::new(PixelGeometryLayer),
        Box::new(VisualRegressionLayer {
            baseline_name: visual_baseline,
        }),
        Box::new(AiDesignAnalysisLayer),
        Box::new(AiVisionCritiqueLayer),
        Box::new(AccessibilityLayer),
    ])
}

/// Applies the world-class authoritative re-gate: when a ticket is
/// world-class, the effective threshold is the greater of the ticket's
/// own threshold and the world-class floor, and this re-gate cannot be
/// bypassed by a nested tool's self-reported score (§4.6).
pub fn world_class_floor_applies(ticket: &JobTicket) -> bool {
    ticket.world_class
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::path::PathBuf;

    fn test_ticket(config: &Config) -> JobTicket {
        let body = serde_json::json!({
            "id": "job-1",
            "jobType": "generic",
            "output": {"path": "out.pdf"},
        });
        JobTicket::parse_and_validate(body.to_string().as_bytes(), config).unwrap()
    }

    #[tokio::test]
    async fn canonical_pipeline_runs_enabled_layers_against_a_real_artifact() {
        let dir = std::env::temp_dir().join("docforge-pipeline-tests");
        fs::create_dir_all(&dir).unwrap();
        let artifact = dir.join("out.pdf");
        fs::write(&artifact, b"%PDF-1.4 test").unwrap();

        let config = Config::for_testing(dir.clone());
        let ticket = test_ticket(&config);
        let pipeline = canonical_pipeline(None);

        let scorecard = pipeline.run(&artifact, &ticket, &config).await.unwrap();
        // Visual regression is disabled without a baseline; AI layers need
        // feature flags or a non-draft tier.
        assert!(scorecard.layers.iter().any(|l| l.layer_id == "l1-structural"));
        assert!(!scorecard.layers.iter().any(|l| l.layer_id == "l3-visual-regression"));
    }

    #[tokio::test]
    async fn run_from_skips_layers_before_the_given_index() {
        let dir = std::env::temp_dir().join("docforge-pipeline-tests-2");
        fs::create_dir_all(&dir).unwrap();
        let artifact = dir.join("out.pdf");
        fs::write(&artifact, b"%PDF-1.4 test").unwrap();

        let config = Config::for_testing(dir.clone());
        let ticket = test_ticket(&config);
        let pipeline = canonical_pipeline(None);
        let index = pipeline.index_of("l2-pixel-geometry").unwrap();

        let scorecard = pipeline
            .run_from(index, &artifact, &ticket, &config)
            .await
            .unwrap();
        assert!(!scorecard.layers.iter().any(|l| l.layer_id == "l1-structural"));
        assert!(scorecard.layers.iter().any(|l| l.layer_id == "l2-pixel-geometry"));
    }

    #[tokio::test]
    async fn missing_artifact_propagates_infrastructure_error() {
        let config = Config::for_testing(PathBuf::from(std::env::temp_dir()));
        let ticket = test_ticket(&config);
        let pipeline = canonical_pipeline(None);
        let err = pipeline
            .run(Path::new("/nonexistent/out.pdf"), &ticket, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Infrastructure { .. }));
    }

    #[test]
    fn world_class_floor_applies_only_to_world_class_tickets() {
        let config = Config::for_testing(PathBuf::from(std::env::temp_dir()));
        let ticket = test_ticket(&config);
        assert!(!world_class_floor_applies(&ticket));
    }
}
