//! Error taxonomy for the orchestrator, transport, and quality gate.
//!
//! Each component owns a narrow error enum; [`DocforgeError`] aggregates
//! them at the boundary so the CLI and HTTP envelopes can map a single
//! flat uppercase code (see `error_code`) regardless of where the
//! failure originated.

use std::time::Duration;

/// Errors raised by the Command Transport (Bridge + Proxy).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bridge not connected to proxy")]
    BridgeDisconnected,

    #[error("proxy unreachable: {reason}")]
    ProxyDown { reason: String },

    #[error("proxy readiness query timed out after {0:?}")]
    ProxyTimeout(Duration),

    #[error("no executor registered for application {application}")]
    NoExecutor { application: String },

    #[error("command {command} timed out after {elapsed:?} (class {class})")]
    CommandTimeout {
        command: String,
        class: String,
        elapsed: Duration,
    },

    #[error("document {key} is locked")]
    DocumentLocked { key: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("executor returned error {code}: {message}")]
    ExecutorError { code: String, message: String },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("request serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the Job Model & Schema Validator.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("path {path} is not within an allow-listed root")]
    PathNotAllowed { path: String },
}

/// Errors raised by the Worker Router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no worker available for ticket {job_id}")]
    NoWorkerAvailable { job_id: String },

    #[error("worker failed: {reason}")]
    WorkerFailed { reason: String },
}

/// Errors raised by the concurrency and budget guards.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("circuit open for service {service}, retry after {retry_after:?}")]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    #[error("budget exceeded: {scope} projected {projected} exceeds cap {cap}")]
    BudgetExceeded {
        scope: String,
        projected: rust_decimal::Decimal,
        cap: rust_decimal::Decimal,
    },
}

/// Errors raised inside a quality-gate layer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The artifact failed a validation layer's content requirements.
    #[error("layer {layer_id} failed: score {score} below threshold {threshold} ({shortfall} short)")]
    ValidationFailed {
        layer_id: String,
        score: f64,
        threshold: f64,
        shortfall: f64,
    },

    /// The layer's tooling itself broke (distinct from a content failure).
    #[error("layer {layer_id} infrastructure error: {reason}")]
    Infrastructure { layer_id: String, reason: String },
}

/// Errors raised by the History & Persistence store.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("job {job_id} not found in history")]
    NotFound { job_id: String },

    #[error("history store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history record serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level error returned by the orchestrator and surfaced to the CLI/HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum DocforgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A short human remediation hint, attached to HTTP error envelopes.
pub fn remediation_hint(err: &DocforgeError) -> Option<String> {
    match err {
        DocforgeError::Transport(TransportError::NoExecutor { application }) => Some(format!(
            "start an executor registered for application \"{application}\" and retry"
        )),
        DocforgeError::Transport(TransportError::BridgeDisconnected) => {
            Some("check that the proxy process is running and reachable".to_string())
        }
        DocforgeError::Transport(TransportError::DocumentLocked { .. }) => {
            Some("retry once the current operation on this document completes".to_string())
        }
        DocforgeError::Guard(GuardError::CircuitOpen { retry_after, .. }) => {
            Some(format!("retry after {retry_after:?}"))
        }
        DocforgeError::Guard(GuardError::BudgetExceeded { .. }) => {
            Some("raise the daily/monthly cap or wait for the next rollover".to_string())
        }
        _ => None,
    }
}

/// The flat uppercase error code taxonomy from the error handling design.
pub fn error_code(err: &DocforgeError) -> &'static str {
    match err {
        DocforgeError::Transport(t) => match t {
            TransportError::BridgeDisconnected => "BRIDGE_DISCONNECTED",
            TransportError::ProxyDown { .. } => "PROXY_DOWN",
            TransportError::ProxyTimeout(_) => "PROXY_TIMEOUT",
            TransportError::NoExecutor { .. } => "NO_EXECUTOR",
            TransportError::CommandTimeout { .. } => "COMMAND_TIMEOUT",
            TransportError::DocumentLocked { .. } => "DOCUMENT_LOCKED",
            TransportError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            TransportError::ExecutorError { .. } => "INTERNAL_ERROR",
            TransportError::Io(_) | TransportError::WebSocket(_) | TransportError::Serde(_) => {
                "INTERNAL_ERROR"
            }
        },
        DocforgeError::Schema(s) => match s {
            SchemaError::Validation(_) => "VALIDATION_ERROR",
            SchemaError::PathNotAllowed { .. } => "PATH_NOT_ALLOWED",
        },
        DocforgeError::Router(r) => match r {
            RouterError::NoWorkerAvailable { .. } => "NO_WORKER_AVAILABLE",
            RouterError::WorkerFailed { .. } => "WORKER_FAILED",
        },
        DocforgeError::Guard(g) => match g {
            GuardError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GuardError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
        },
        DocforgeError::Pipeline(p) => match p {
            PipelineError::ValidationFailed { .. } => "VALIDATION_FAILED",
            PipelineError::Infrastructure { .. } => "INFRASTRUCTURE_ERROR",
        },
        DocforgeError::History(h) => match h {
            HistoryError::NotFound { .. } => "JOB_NOT_FOUND",
            HistoryError::Io(_) | HistoryError::Serde(_) => "INTERNAL_ERROR",
        },
        DocforgeError::Internal(_) => "INTERNAL_ERROR",
    }
}

/// CLI exit code mapping from the error handling design (§7/§8).
///
/// 0 = success (not reachable from an error value), 1 = validation
/// failure (user fixable), 2 = worker/transport error (operational),
/// 3 = infrastructure error (tool broken).
pub fn exit_code(err: &DocforgeError) -> i32 {
    match err {
        DocforgeError::Schema(_) => 1,
        DocforgeError::Pipeline(PipelineError::ValidationFailed { .. }) => 1,
        DocforgeError::Pipeline(PipelineError::Infrastructure { .. }) => 3,
        DocforgeError::Transport(_) | DocforgeError::Router(_) | DocforgeError::Guard(_) => 2,
        DocforgeError::History(_) | DocforgeError::Internal(_) => 3,
    }
}

pub type Result<T, E = DocforgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(
            exit_code(&DocforgeError::Schema(SchemaError::Validation(vec![]))),
            1
        );
        assert_eq!(
            exit_code(&DocforgeError::Pipeline(PipelineError::ValidationFailed {
                layer_id: "l4".into(),
                score: 0.8,
                threshold: 0.95,
                shortfall: 0.15,
            })),
            1
        );
        assert_eq!(
            exit_code(&DocforgeError::Pipeline(PipelineError::Infrastructure {
                layer_id: "l3".into(),
                reason: "tool crashed".into(),
            })),
            3
        );
        assert_eq!(
            exit_code(&DocforgeError::Transport(TransportError::NoExecutor {
                application: "indesign".into(),
            })),
            2
        );
        assert_eq!(
            exit_code(&DocforgeError::Guard(GuardError::CircuitOpen {
                service: "serverless-pdf".into(),
                retry_after: Duration::from_secs(60),
            })),
            2
        );
    }

    #[test]
    fn error_codes_are_flat_uppercase() {
        let err = DocforgeError::Transport(TransportError::NoExecutor {
            application: "indesign".into(),
        });
        assert_eq!(error_code(&err), "NO_EXECUTOR");
        assert!(remediation_hint(&err).is_some());
    }
}
