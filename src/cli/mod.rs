//! `orchestrate` CLI surface (§6): submit a ticket, validate one without
//! running it, or inspect recent job history.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::DocforgeError;
use crate::guards::{BudgetLedger, CircuitBreakerRegistry, GlobalWriterLock};
use crate::history::{FileHistoryStore, HistoryStore, JobStats};
use crate::orchestrator::{Orchestrator, OrchestratorDeps, RunOptions};
use crate::quality::canonical_pipeline;
use crate::ticket::JobTicket;
use crate::transport::Bridge;
use crate::worker::{LocalInteractiveWorker, MultiServerWorker, ServerlessWorker};

#[derive(Parser, Debug)]
#[command(name = "docforge", about = "Orchestrates automated PDF production")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a job ticket through the full orchestrator pipeline.
    Orchestrate {
        /// Path to a JSON job ticket.
        ticket: PathBuf,

        /// Route and validate the ticket but skip dispatch and the
        /// quality gate (still persists a `skipped` job result).
        #[arg(long)]
        dry_run: bool,

        /// Override the ticket's effective QA threshold (still clamped
        /// to the world-class floor on world-class tickets).
        #[arg(long)]
        threshold: Option<f64>,

        /// Override the `l4-ai-vision-critique` layer's threshold.
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Parse and validate a ticket without routing or dispatching it.
    Validate {
        /// Path to a JSON job ticket.
        ticket: PathBuf,
    },

    /// Summarize recent job history.
    Status {
        /// Number of recent jobs to include.
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Exit non-zero if the window's error rate exceeds this fraction.
        #[arg(long)]
        error_rate: Option<f64>,
    },

    /// Start the Bridge's submitter-facing HTTP surface in-process.
    Serve,
}

/// Builds the full dependency graph the `orchestrate` subcommand needs.
/// `validate`/`status` use a narrower slice of this and don't connect the
/// bridge.
async fn build_orchestrator(config: Arc<Config>) -> anyhow::Result<Orchestrator> {
    let bridge = Arc::new(Bridge::new(config.clone(), "indesign"));
    bridge.connect().await?;

    let writer_lock = Arc::new(GlobalWriterLock::default());
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
    let budget = Arc::new(BudgetLedger::new(config.budget_caps.clone(), chrono::Utc::now()));
    let history: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::new(
        config.history_root.clone(),
        config.scorecards_root.clone(),
    ));

    let local_interactive = Arc::new(LocalInteractiveWorker::new(bridge, writer_lock.clone()));
    let serverless = Arc::new(ServerlessWorker::new(&config));
    let multi_server = Arc::new(MultiServerWorker::new(&config, writer_lock.clone()));

    let deps = OrchestratorDeps {
        config,
        writer_lock,
        breakers,
        budget,
        history,
        local_interactive,
        serverless,
        multi_server,
        quality_pipeline: canonical_pipeline(None),
    };
    Ok(Orchestrator::new(deps))
}

/// Dispatches a parsed [`Cli`] invocation, returning the process exit code.
pub async fn run(cli: Cli, config: Arc<Config>) -> i32 {
    match cli.command {
        Command::Orchestrate { ticket, dry_run, threshold, confidence } => {
            let body = match std::fs::read(&ticket) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("could not read {}: {e}", ticket.display());
                    return 3;
                }
            };

            let orchestrator = match build_orchestrator(config).await {
                Ok(o) => o,
                Err(e) => {
                    eprintln!("could not start orchestrator: {e}");
                    return 3;
                }
            };

            let options = RunOptions { dry_run, threshold, confidence };
            match orchestrator.run_job(&body, &options).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
                    0
                }
                Err(e) => {
                    eprintln!("{e}");
                    crate::error::exit_code(&e)
                }
            }
        }

        Command::Validate { ticket } => {
            let body = match std::fs::read(&ticket) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("could not read {}: {e}", ticket.display());
                    return 3;
                }
            };
            match JobTicket::parse_and_validate(&body, &config) {
                Ok(parsed) => {
                    println!("{}", serde_json::to_string_pretty(&parsed).unwrap_or_default());
                    0
                }
                Err(e) => {
                    eprintln!("{e}");
                    crate::error::exit_code(&DocforgeError::Schema(e))
                }
            }
        }

        Command::Status { limit, error_rate } => {
            let history = FileHistoryStore::new(
                config.history_root.clone(),
                config.scorecards_root.clone(),
            );
            let recent = match history.list_recent(limit).await {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("{e}");
                    return 3;
                }
            };
            let stats = JobStats::from_results(&recent);
            println!(
                "{} jobs ({} ok, {} failed, {} skipped), error rate {:.1}%, total cost {}",
                stats.total_jobs,
                stats.succeeded_jobs,
                stats.failed_jobs,
                stats.skipped_jobs,
                stats.error_rate * 100.0,
                stats.total_cost,
            );
            match error_rate {
                Some(cap) if stats.error_rate > cap => 1,
                _ => 0,
            }
        }

        Command::Serve => {
            let bridge = Arc::new(Bridge::new(config.clone(), "indesign"));
            if let Err(e) = bridge.connect().await {
                eprintln!("could not connect to proxy: {e}");
                return 3;
            }
            if let Err(e) = bridge.serve(config.bridge_addr).await {
                eprintln!("bridge server error: {e}");
                return 3;
            }
            0
        }
    }
}
