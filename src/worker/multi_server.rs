//! Multi-Server worker: fans a job out across the external tool servers
//! named in the ticket's `multi-server.workflow`, each reached with its
//! own token from config. Takes the global writer lock like Local
//! Interactive, since a multi-server workflow may still touch the
//! desktop application mid-pipeline (§4.4, §4.5 "Invocation").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::config::Config;
use crate::error::RouterError;
use crate::guards::GlobalWriterLock;
use crate::ticket::JobTicket;
use crate::worker::{Worker, WorkerOutput};

pub struct MultiServerWorker {
    client: Client,
    tokens: std::collections::HashMap<String, secrecy::SecretString>,
    writer_lock: Arc<GlobalWriterLock>,
}

impl MultiServerWorker {
    pub fn new(config: &Config, writer_lock: Arc<GlobalWriterLock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            tokens: config.credentials.multi_server_tokens.clone(),
            writer_lock,
        }
    }

    fn servers_for(&self, workflow: &str) -> Vec<String> {
        workflow
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[async_trait]
impl Worker for MultiServerWorker {
    fn service_key(&self) -> &str {
        "multi-server"
    }

    fn estimated_cost(&self) -> rust_decimal::Decimal {
        rust_decimal_macros::dec!(0.05)
    }

    async fn execute(&self, ticket: &JobTicket) -> Result<WorkerOutput, RouterError> {
        let Some(workflow) = &ticket.multi_server_workflow else {
            return Err(RouterError::NoWorkerAvailable {
                job_id: ticket.id.clone(),
            });
        };

        let servers = self.servers_for(workflow);
        if servers.is_empty() {
            return Err(RouterError::NoWorkerAvailable {
                job_id: ticket.id.clone(),
            });
        }

        let _guard = self.writer_lock.acquire(&ticket.id).await;

        let mut cost = Vec::new();
        for server in &servers {
            let token = self
                .tokens
                .get(server)
                .map(|t| t.expose_secret().to_string())
                .unwrap_or_default();

            let body = serde_json::json!({
                "jobId": ticket.id,
                "payload": ticket.payload,
            });

            let response = self
                .client
                .post(server)
                .header("Authorization", format!("Bearer {token}"))
                .json(&body)
                .send()
                .await
                .map_err(|e| RouterError::WorkerFailed {
                    reason: format!("tool server {server} failed: {e}"),
                })?;

            if !response.status().is_success() {
                return Err(RouterError::WorkerFailed {
                    reason: format!("tool server {server} returned {}", response.status()),
                });
            }

            cost.push((server.clone(), rust_decimal::Decimal::ZERO));
        }

        Ok(WorkerOutput {
            artifact_path: ticket.resolved_output.clone(),
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_without_a_workflow_reports_no_worker_available() {
        let config = Config::for_testing(std::env::temp_dir());
        let lock = Arc::new(GlobalWriterLock::default());
        let worker = MultiServerWorker::new(&config, lock);

        let body = serde_json::json!({
            "id": "job-1",
            "jobType": "generic",
            "output": {"path": "out.pdf"},
        });
        let ticket =
            JobTicket::parse_and_validate(body.to_string().as_bytes(), &config).unwrap();

        let err = worker.execute(&ticket).await.unwrap_err();
        assert!(matches!(err, RouterError::NoWorkerAvailable { .. }));
    }

    #[test]
    fn servers_for_splits_and_trims_comma_separated_names() {
        let config = Config::for_testing(std::env::temp_dir());
        let lock = Arc::new(GlobalWriterLock::default());
        let worker = MultiServerWorker::new(&config, lock);
        assert_eq!(
            worker.servers_for("https://a, https://b"),
            vec!["https://a".to_string(), "https://b".to_string()]
        );
    }
}
