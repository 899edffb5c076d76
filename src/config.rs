//! Immutable process configuration, built once at startup from environment
//! variables (via `dotenvy`) and CLI flags (via `clap`), then handed down
//! by reference. Nothing re-reads the environment mid-run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use crate::ticket::QualityTier;

/// Per-command-class timeout table (§4.1).
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    classes: HashMap<String, Duration>,
    default: Duration,
}

impl TimeoutTable {
    pub fn lookup(&self, command_class: &str) -> Duration {
        self.classes
            .get(command_class)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn with_override(&self, command_class: &str, timeout: Duration) -> Self {
        let mut classes = self.classes.clone();
        classes.insert(command_class.to_string(), timeout);
        Self {
            classes,
            default: self.default,
        }
    }
}

impl Default for TimeoutTable {
    fn default() -> Self {
        let mut classes = HashMap::new();
        classes.insert("create".to_string(), Duration::from_secs(15));
        classes.insert("place_text".to_string(), Duration::from_secs(20));
        classes.insert("export_pdf".to_string(), Duration::from_secs(120));
        classes.insert("screen_capture".to_string(), Duration::from_secs(30));
        classes.insert("ping".to_string(), Duration::from_secs(5));
        classes.insert("list_presets".to_string(), Duration::from_secs(5));
        Self {
            classes,
            default: Duration::from_secs(30),
        }
    }
}

/// Default QA thresholds per quality tier, before the world-class floor clamp.
#[derive(Debug, Clone)]
pub struct QaDefaults {
    pub draft: f64,
    pub standard: f64,
    pub world_class: f64,
}

impl Default for QaDefaults {
    fn default() -> Self {
        Self {
            draft: 0.70,
            standard: 0.90,
            world_class: 0.95,
        }
    }
}

impl QaDefaults {
    pub fn default_for(&self, tier: QualityTier) -> f64 {
        match tier {
            QualityTier::Draft => self.draft,
            QualityTier::Standard => self.standard,
            QualityTier::WorldClass => self.world_class,
        }
    }
}

/// Daily/monthly budget caps for the cost ledger (§4.5).
#[derive(Debug, Clone)]
pub struct BudgetCaps {
    pub daily: Decimal,
    pub monthly: Decimal,
    /// Alert thresholds as fractions of the cap, e.g. 0.5, 0.75, 0.9.
    pub alert_fractions: Vec<f64>,
}

impl Default for BudgetCaps {
    fn default() -> Self {
        Self {
            daily: dec!(50),
            monthly: dec!(1000),
            alert_fractions: vec![0.5, 0.75, 0.9],
        }
    }
}

/// Circuit breaker parameters (§4.5), shared by all (worker-kind, service) pairs
/// unless a deployment wants to tune per-service eventually.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(5 * 60),
            half_open_probes: 1,
        }
    }
}

/// Idempotency cache sizing (§4.2).
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            capacity: 1000,
        }
    }
}

/// Service credentials, read only from the environment, never accepted
/// inline on a ticket.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub serverless_api_key: Option<SecretString>,
    pub multi_server_tokens: HashMap<String, SecretString>,
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem roots an output sink path is allowed to resolve within.
    pub allowed_output_roots: Vec<PathBuf>,
    pub timeouts: TimeoutTable,
    pub qa_defaults: QaDefaults,
    pub budget_caps: BudgetCaps,
    pub breaker: BreakerConfig,
    pub idempotency: IdempotencyConfig,
    pub bridge_addr: std::net::SocketAddr,
    pub proxy_addr: std::net::SocketAddr,
    pub proxy_url: String,
    pub history_root: PathBuf,
    pub scorecards_root: PathBuf,
    /// Directory the rotating JSON log files are written under (§6).
    pub log_root: PathBuf,
    pub serverless_endpoint: Option<String>,
    pub credentials: Credentials,
    /// Feature toggles for pre-release quality-gate layers (§6).
    pub experimental_layers: Vec<String>,
    pub readiness_timeout: Duration,
    pub document_lock_timeout: Duration,
}

impl Config {
    /// Build configuration from environment variables, applying defaults
    /// for anything unset. Call once at process start.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let allowed_output_roots = std::env::var("DOCFORGE_OUTPUT_ROOTS")
            .ok()
            .map(|v| v.split(':').map(PathBuf::from).collect())
            .unwrap_or_else(|| vec![PathBuf::from("./out")]);

        let bridge_addr = std::env::var("DOCFORGE_BRIDGE_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| ([127, 0, 0, 1], 8787).into());

        let proxy_addr = std::env::var("DOCFORGE_PROXY_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| ([127, 0, 0, 1], 8788).into());

        let proxy_url =
            std::env::var("DOCFORGE_PROXY_URL").unwrap_or_else(|_| format!("http://{proxy_addr}"));

        let history_root = std::env::var("DOCFORGE_HISTORY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/history"));

        let scorecards_root = std::env::var("DOCFORGE_SCORECARDS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/scorecards"));

        let log_root = std::env::var("DOCFORGE_LOG_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/logs"));

        let serverless_endpoint = std::env::var("DOCFORGE_SERVERLESS_ENDPOINT").ok();

        let credentials = Credentials {
            serverless_api_key: std::env::var("DOCFORGE_SERVERLESS_API_KEY")
                .ok()
                .map(SecretString::from),
            multi_server_tokens: HashMap::new(),
        };

        let experimental_layers = std::env::var("DOCFORGE_EXPERIMENTAL_LAYERS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Self {
            allowed_output_roots,
            timeouts: TimeoutTable::default(),
            qa_defaults: QaDefaults::default(),
            budget_caps: BudgetCaps::default(),
            breaker: BreakerConfig::default(),
            idempotency: IdempotencyConfig::default(),
            bridge_addr,
            proxy_addr,
            proxy_url,
            history_root,
            scorecards_root,
            log_root,
            serverless_endpoint,
            credentials,
            experimental_layers,
            readiness_timeout: Duration::from_secs(2),
            document_lock_timeout: Duration::from_secs(30),
        }
    }

    /// A configuration with safe defaults and no environment dependency,
    /// for tests and examples.
    pub fn for_testing(output_root: PathBuf) -> Self {
        let history_root = output_root.join("history");
        let scorecards_root = output_root.join("scorecards");
        let log_root = output_root.join("logs");
        Self {
            allowed_output_roots: vec![output_root],
            timeouts: TimeoutTable::default(),
            qa_defaults: QaDefaults::default(),
            budget_caps: BudgetCaps::default(),
            breaker: BreakerConfig::default(),
            idempotency: IdempotencyConfig::default(),
            bridge_addr: ([127, 0, 0, 1], 0).into(),
            proxy_addr: ([127, 0, 0, 1], 0).into(),
            proxy_url: "http://127.0.0.1:0".to_string(),
            history_root,
            scorecards_root,
            log_root,
            serverless_endpoint: None,
            credentials: Credentials::default(),
            experimental_layers: Vec::new(),
            readiness_timeout: Duration::from_secs(2),
            document_lock_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_table_falls_back_to_default() {
        let table = TimeoutTable::default();
        assert_eq!(table.lookup("export_pdf"), Duration::from_secs(120));
        assert_eq!(table.lookup("nonexistent"), Duration::from_secs(30));
    }

    #[test]
    fn timeout_override_does_not_mutate_shared_table() {
        let table = TimeoutTable::default();
        let overridden = table.with_override("export_pdf", Duration::from_secs(5));
        assert_eq!(table.lookup("export_pdf"), Duration::from_secs(120));
        assert_eq!(overridden.lookup("export_pdf"), Duration::from_secs(5));
    }

    #[test]
    fn qa_defaults_match_tiers() {
        let defaults = QaDefaults::default();
        assert_eq!(defaults.default_for(QualityTier::Draft), 0.70);
        assert_eq!(defaults.default_for(QualityTier::WorldClass), 0.95);
    }
}
