//! Local Interactive worker: dispatches a job through the Command
//! Transport to the desktop application, holding the global writer lock
//! for the duration of the command (§4.4, §4.5 "Invocation").

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RouterError;
use crate::guards::GlobalWriterLock;
use crate::ticket::JobTicket;
use crate::transport::Bridge;
use crate::worker::{Worker, WorkerOutput};

pub struct LocalInteractiveWorker {
    bridge: Arc<Bridge>,
    writer_lock: Arc<GlobalWriterLock>,
}

impl LocalInteractiveWorker {
    pub fn new(bridge: Arc<Bridge>, writer_lock: Arc<GlobalWriterLock>) -> Self {
        Self { bridge, writer_lock }
    }
}

#[async_trait]
impl Worker for LocalInteractiveWorker {
    fn service_key(&self) -> &str {
        "local-interactive"
    }

    /// Exactly one document export may be in flight at a time, since the
    /// desktop application is a single-document editor (§4.5 "Invocation:
    /// Local Interactive and Multi-Server calls take the global mutex").
    async fn execute(&self, ticket: &JobTicket) -> Result<WorkerOutput, RouterError> {
        let _guard = self.writer_lock.acquire(&ticket.id).await;

        let args = serde_json::json!({
            "jobId": ticket.id,
            "payload": ticket.payload,
            "outputPath": ticket.resolved_output,
        });

        let response = self
            .bridge
            .submit("export_pdf", args)
            .await
            .map_err(|e| RouterError::WorkerFailed {
                reason: e.to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(RouterError::WorkerFailed {
                reason: format!("{}: {}", err.code, err.message),
            });
        }

        Ok(WorkerOutput {
            artifact_path: ticket.resolved_output.clone(),
            cost: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn execute_fails_with_worker_failed_when_bridge_is_disconnected() {
        let config = Arc::new(Config::for_testing(std::env::temp_dir()));
        let bridge = Arc::new(Bridge::new(config.clone(), "indesign"));
        let lock = Arc::new(GlobalWriterLock::default());
        let worker = LocalInteractiveWorker::new(bridge, lock);

        let body = serde_json::json!({
            "id": "job-1",
            "jobType": "generic",
            "output": {"path": "out.pdf"},
        });
        let ticket =
            JobTicket::parse_and_validate(body.to_string().as_bytes(), &config).unwrap();

        let err = worker.execute(&ticket).await.unwrap_err();
        assert!(matches!(err, RouterError::WorkerFailed { .. }));
    }
}
