//! Worker implementations chosen by the Worker Router (§4.4): local
//! interactive (via the Command Transport), serverless batch, and
//! multi-server orchestration.

mod local_interactive;
mod multi_server;
mod serverless;

pub use local_interactive::LocalInteractiveWorker;
pub use multi_server::MultiServerWorker;
pub use serverless::ServerlessWorker;

use async_trait::async_trait;

use crate::error::RouterError;
use crate::ticket::JobTicket;

/// The artifact and per-service cost produced by a worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub artifact_path: std::path::PathBuf,
    pub cost: Vec<(String, rust_decimal::Decimal)>,
}

/// A worker kind invoked by the router with a ticket already resolved
/// against config (§4.4 "Invocation").
#[async_trait]
pub trait Worker: Send + Sync {
    /// The service key this worker's calls are billed/circuit-broken
    /// under (§4.5).
    fn service_key(&self) -> &str;

    /// A conservative per-invocation cost estimate checked against the
    /// budget ledger before dispatch (§4.5 "Invocation"). The actual
    /// charged amount, once known, is recorded separately from
    /// `WorkerOutput::cost`. Zero for workers with no external billing.
    fn estimated_cost(&self) -> rust_decimal::Decimal {
        rust_decimal::Decimal::ZERO
    }

    async fn execute(&self, ticket: &JobTicket) -> Result<WorkerOutput, RouterError>;
}
