//! Serverless Batch worker: calls a headless rendering endpoint over
//! HTTP. Unlike the Local Interactive and Multi-Server workers, it does
//! not take the global writer lock — the serverless backend handles its
//! own concurrency (§4.4, §4.5 "Invocation").

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::Config;
use crate::error::RouterError;
use crate::ticket::JobTicket;
use crate::worker::{Worker, WorkerOutput};

pub struct ServerlessWorker {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<secrecy::SecretString>,
}

impl ServerlessWorker {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: config.serverless_endpoint.clone(),
            api_key: config.credentials.serverless_api_key.clone(),
        }
    }

    fn api_key(&self) -> String {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    #[serde(rename = "artifactPath")]
    artifact_path: String,
    #[serde(default)]
    units_billed: f64,
}

#[async_trait]
impl Worker for ServerlessWorker {
    fn service_key(&self) -> &str {
        "serverless-batch"
    }

    fn estimated_cost(&self) -> rust_decimal::Decimal {
        rust_decimal_macros::dec!(0.10)
    }

    async fn execute(&self, ticket: &JobTicket) -> Result<WorkerOutput, RouterError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(RouterError::NoWorkerAvailable {
                job_id: ticket.id.clone(),
            });
        };

        let body = serde_json::json!({
            "jobId": ticket.id,
            "payload": ticket.payload,
            "outputPath": ticket.resolved_output,
        });

        let response = self
            .client
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key()))
            .json(&body)
            .send()
            .await
            .map_err(|e| RouterError::WorkerFailed {
                reason: format!("serverless request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(RouterError::WorkerFailed {
                reason: format!("serverless backend returned {}", response.status()),
            });
        }

        let parsed: RenderResponse = response.json().await.map_err(|e| RouterError::WorkerFailed {
            reason: format!("malformed serverless response: {e}"),
        })?;

        Ok(WorkerOutput {
            artifact_path: PathBuf::from(parsed.artifact_path),
            cost: vec![(
                "serverless-batch".to_string(),
                rust_decimal::Decimal::try_from(parsed.units_billed).unwrap_or_default(),
            )],
        })
    }
}
