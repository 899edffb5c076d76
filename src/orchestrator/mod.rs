//! Job Orchestrator (§4.7): the top-level per-job control flow tying
//! together schema validation, routing, the concurrency/budget guards,
//! worker dispatch, and the quality gate.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::Config;
use crate::error::{DocforgeError, PipelineError};
use crate::guards::{BudgetLedger, CircuitBreakerRegistry, GlobalWriterLock};
use crate::history::HistoryStore;
use crate::quality::{Pipeline, Scorecard};
use crate::router::{self, WorkerKind};
use crate::ticket::{CostBreakdown, JobResult, JobTicket, Outcome, StageTiming, WORLD_CLASS_FLOOR};
use crate::worker::Worker;

/// Per-invocation overrides from CLI flags (§6 "CLI surface").
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip worker dispatch and the quality gate; validate, resolve
    /// thresholds, and run L0 only.
    pub dry_run: bool,
    /// Overrides the ticket's effective QA threshold for this run. Still
    /// clamped to the world-class floor on a world-class ticket.
    pub threshold: Option<f64>,
    /// Overrides the AI vision critique layer's threshold for this run.
    pub confidence: Option<f64>,
}

/// The concrete collaborators the orchestrator drives, wired once at
/// process start (§10 "RUST TYPE SKETCH").
pub struct OrchestratorDeps {
    pub config: Arc<Config>,
    pub writer_lock: Arc<GlobalWriterLock>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub budget: Arc<BudgetLedger>,
    pub history: Arc<dyn HistoryStore>,
    pub local_interactive: Arc<dyn Worker>,
    pub serverless: Arc<dyn Worker>,
    pub multi_server: Arc<dyn Worker>,
    pub quality_pipeline: Pipeline,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Runs the algorithm in §4.7 for one ticket body, end to end.
    pub async fn run_job(
        &self,
        ticket_body: &[u8],
        options: &RunOptions,
    ) -> Result<JobResult, DocforgeError> {
        let mut stage_timings = Vec::new();

        // 1+2. Parse, validate, resolve thresholds.
        let started = Instant::now();
        let mut ticket = JobTicket::parse_and_validate(ticket_body, &self.deps.config)?;
        apply_overrides(&mut ticket, options);
        stage_timings.push(StageTiming {
            stage: "validate".to_string(),
            duration: started.elapsed(),
        });

        // 3. L0 planning/asset prep.
        let started = Instant::now();
        run_l0_preflight(&ticket)?;
        stage_timings.push(StageTiming {
            stage: "l0-preflight".to_string(),
            duration: started.elapsed(),
        });

        if options.dry_run {
            let result = JobResult {
                job_id: ticket.id.clone(),
                outcome: Outcome::Skipped,
                artifact_paths: vec![],
                scorecard: None,
                stage_timings,
                cost: CostBreakdown::default(),
                error_chain: vec![],
            };
            self.deps.history.save_result(&result).await?;
            return Ok(result);
        }

        // 4. Select worker (the global mutex, when required, is acquired
        // inside the local-interactive/multi-server worker itself so its
        // hold time is scoped exactly to the dispatch). The assertion below
        // keeps that hard-coded per-worker locking in sync with the
        // router's own `requires_global_lock` call, instead of letting the
        // two silently drift apart.
        let serverless_configured = self.deps.config.serverless_endpoint.is_some();
        let decision = router::route(&ticket, serverless_configured);
        debug_assert_eq!(
            decision.requires_global_lock,
            !matches!(decision.worker, WorkerKind::ServerlessBatch),
            "routing decision disagrees with which worker kinds hold the global writer lock"
        );
        tracing::debug!(
            job_id = %ticket.id,
            worker = ?decision.worker,
            rule = ?decision.rule,
            requires_global_lock = decision.requires_global_lock,
            no_fallback = decision.no_fallback,
            "routed job"
        );
        let worker: &Arc<dyn Worker> = match decision.worker {
            WorkerKind::LocalInteractive => &self.deps.local_interactive,
            WorkerKind::ServerlessBatch => &self.deps.serverless,
            WorkerKind::MultiServer => &self.deps.multi_server,
        };

        // 5. Enforce budget + circuit breaker before dispatch.
        self.deps.breakers.check(worker.service_key()).await?;
        self.deps
            .budget
            .check_and_reserve(worker.service_key(), worker.estimated_cost(), Utc::now())
            .await?;

        let started = Instant::now();
        let dispatch = worker.execute(&ticket).await;
        stage_timings.push(StageTiming {
            stage: "dispatch".to_string(),
            duration: started.elapsed(),
        });

        let output = match dispatch {
            Ok(output) => {
                self.deps.breakers.record_success(worker.service_key()).await;
                output
            }
            Err(e) => {
                self.deps.breakers.record_failure(worker.service_key()).await;
                if decision.no_fallback {
                    tracing::warn!(
                        job_id = %ticket.id,
                        rule = ?decision.rule,
                        "TFU/world-class failsafe prevented fallback to another worker kind after dispatch failure"
                    );
                }
                let result = JobResult {
                    job_id: ticket.id.clone(),
                    outcome: Outcome::Failure,
                    artifact_paths: vec![],
                    scorecard: None,
                    stage_timings,
                    cost: CostBreakdown::default(),
                    error_chain: vec![e.to_string()],
                };
                self.deps.history.save_result(&result).await?;
                return Err(e.into());
            }
        };

        let mut cost = CostBreakdown::default();
        for (service, amount) in &output.cost {
            cost.add(service.clone(), *amount);
        }

        // 6. Quality gate.
        let started = Instant::now();
        let scorecard = self
            .deps
            .quality_pipeline
            .run(&output.artifact_path, &ticket, &self.deps.config)
            .await?;
        stage_timings.push(StageTiming {
            stage: "quality-gate".to_string(),
            duration: started.elapsed(),
        });

        let passed = scorecard.passes(ticket.effective_qa_threshold);
        let error_chain = if passed {
            Vec::new()
        } else {
            vec![describe_failure(&scorecard, ticket.effective_qa_threshold)]
        };

        // 7. Persist scorecard and result.
        self.deps.history.save_scorecard(&ticket.id, &scorecard).await?;
        let result = JobResult {
            job_id: ticket.id.clone(),
            outcome: if passed { Outcome::Success } else { Outcome::Failure },
            artifact_paths: vec![output.artifact_path.display().to_string()],
            scorecard: Some(scorecard.clone()),
            stage_timings,
            cost,
            error_chain,
        };
        self.deps.history.save_result(&result).await?;

        // 8. The writer lock, if taken, was already released when the
        // worker's guard dropped at the end of `execute`.
        if !passed {
            return Err(validation_failure_error(&scorecard, ticket.effective_qa_threshold).into());
        }
        Ok(result)
    }
}

fn apply_overrides(ticket: &mut JobTicket, options: &RunOptions) {
    if let Some(threshold) = options.threshold {
        ticket.effective_qa_threshold = if ticket.world_class {
            threshold.max(WORLD_CLASS_FLOOR)
        } else {
            threshold
        };
    }
    if let Some(confidence) = options.confidence {
        ticket
            .qa_layer_overrides
            .insert("l4-ai-vision-critique".to_string(), confidence);
    }
}

/// L0 planning/asset prep (§4.7 step 3): resolves template/asset paths
/// ahead of worker dispatch. A no-op unless the ticket opts in via the
/// `l0-asset-prep` feature flag; its own failures only block the job when
/// `l0-blocking` is also set (§4.7 "L0 failures do not block unless
/// flagged blocking").
fn run_l0_preflight(ticket: &JobTicket) -> Result<(), PipelineError> {
    if !ticket.feature_flags.iter().any(|f| f == "l0-asset-prep") {
        return Ok(());
    }

    let blocking = ticket.feature_flags.iter().any(|f| f == "l0-blocking");
    if ticket.payload.is_none() {
        if blocking {
            return Err(PipelineError::Infrastructure {
                layer_id: "l0-asset-prep".to_string(),
                reason: "no payload to resolve assets from".to_string(),
            });
        }
        tracing::warn!(job_id = %ticket.id, "L0 asset prep skipped: ticket has no payload");
    }
    Ok(())
}

fn describe_failure(scorecard: &Scorecard, threshold: f64) -> String {
    match scorecard.first_failure() {
        Some(l) => format!(
            "layer {} scored {:.3} below its threshold {:.3}",
            l.layer_id, l.normalized_score, l.threshold_used
        ),
        None => format!(
            "aggregate score {:.3} below tier threshold {:.3}",
            scorecard.aggregate(),
            threshold
        ),
    }
}

fn validation_failure_error(scorecard: &Scorecard, threshold: f64) -> PipelineError {
    match scorecard.first_failure() {
        Some(l) => PipelineError::ValidationFailed {
            layer_id: l.layer_id.clone(),
            score: l.normalized_score,
            threshold: l.threshold_used,
            shortfall: (l.threshold_used - l.normalized_score).max(0.0),
        },
        None => {
            let score = scorecard.aggregate();
            PipelineError::ValidationFailed {
                layer_id: "aggregate".to_string(),
                score,
                threshold,
                shortfall: (threshold - score).max(0.0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use crate::history::FileHistoryStore;
    use crate::quality::layers::StructuralLayer;
    use crate::worker::WorkerOutput;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    struct FakeWorker {
        artifact_path: PathBuf,
        fail: bool,
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn service_key(&self) -> &str {
            "fake"
        }

        async fn execute(&self, _ticket: &JobTicket) -> Result<WorkerOutput, RouterError> {
            if self.fail {
                return Err(RouterError::WorkerFailed {
                    reason: "simulated failure".to_string(),
                });
            }
            Ok(WorkerOutput {
                artifact_path: self.artifact_path.clone(),
                cost: vec![("fake".to_string(), Decimal::ZERO)],
            })
        }
    }

    fn test_deps(dir: &std::path::Path, worker: Arc<dyn Worker>) -> OrchestratorDeps {
        let config = Arc::new(Config::for_testing(dir.to_path_buf()));
        OrchestratorDeps {
            config: config.clone(),
            writer_lock: Arc::new(GlobalWriterLock::default()),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.breaker.clone())),
            budget: Arc::new(BudgetLedger::new(config.budget_caps.clone(), Utc::now())),
            history: Arc::new(FileHistoryStore::new(
                config.history_root.clone(),
                config.scorecards_root.clone(),
            )),
            local_interactive: worker.clone(),
            serverless: worker.clone(),
            multi_server: worker,
            quality_pipeline: Pipeline::new(vec![Box::new(StructuralLayer)]),
        }
    }

    fn ticket_body() -> Vec<u8> {
        serde_json::json!({
            "id": "job-1",
            "jobType": "generic",
            "output": {"path": "out.pdf"},
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn dry_run_skips_dispatch_and_records_a_skipped_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            artifact_path: dir.path().join("missing.pdf"),
            fail: false,
        });
        let orchestrator = Orchestrator::new(test_deps(dir.path(), worker));

        let result = orchestrator
            .run_job(&ticket_body(), &RunOptions { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn invalid_ticket_fails_before_any_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            artifact_path: dir.path().join("missing.pdf"),
            fail: true,
        });
        let orchestrator = Orchestrator::new(test_deps(dir.path(), worker));

        let err = orchestrator
            .run_job(br#"{"id": "", "output": {}}"#, &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocforgeError::Schema(_)));
    }

    #[tokio::test]
    async fn worker_failure_is_persisted_and_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            artifact_path: dir.path().join("missing.pdf"),
            fail: true,
        });
        let orchestrator = Orchestrator::new(test_deps(dir.path(), worker));

        let err = orchestrator
            .run_job(&ticket_body(), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocforgeError::Router(_)));
    }

    #[tokio::test]
    async fn tfu_ticket_failure_takes_the_no_fallback_path() {
        let dir = tempfile::tempdir().unwrap();
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            artifact_path: dir.path().join("missing.pdf"),
            fail: true,
        });
        let orchestrator = Orchestrator::new(test_deps(dir.path(), worker));

        let body = serde_json::json!({
            "id": "job-tfu",
            "jobType": "generic",
            "style": "TFU",
            "output": {"path": "out.pdf"},
        })
        .to_string()
        .into_bytes();

        let err = orchestrator
            .run_job(&body, &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocforgeError::Router(RouterError::WorkerFailed { .. })));

        // The ticket that hit that failure path routes via the TFU
        // failsafe rule, which is what makes the orchestrator's
        // dispatch-failure branch log that no fallback was attempted.
        let config = Config::for_testing(dir.path().to_path_buf());
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        let decision = router::route(&ticket, true);
        assert_eq!(decision.rule, router::RoutingRule::TfuOrMultiServer);
        assert!(decision.no_fallback);
    }

    #[tokio::test]
    async fn successful_job_passes_the_gate_and_persists_a_scorecard() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("out.pdf");
        std::fs::write(&artifact, b"%PDF-1.4 test").unwrap();
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            artifact_path: artifact,
            fail: false,
        });
        let deps = test_deps(dir.path(), worker);
        let history = deps.history.clone();
        let orchestrator = Orchestrator::new(deps);

        let result = orchestrator
            .run_job(&ticket_body(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Success);
        assert!(history.get_scorecard("job-1").await.unwrap().is_some());
    }
}
