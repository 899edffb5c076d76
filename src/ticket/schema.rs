//! Ticket schema, normalization, and path-safety enforcement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    PartnershipDocument,
    ProgramReport,
    AnnualReport,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerPreference {
    Auto,
    LocalInteractive,
    ServerlessBatch,
    MultiServer,
}

/// The `quality` schema field (§4.3): a coarse input hint consumed by the
/// router's rule #3. Distinct from [`QualityTier`], the threshold-bearing
/// tier the orchestrator derives once `worldClass` is taken into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Standard,
    High,
}

/// The effective quality tier used for QA thresholding (§3's data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    Draft,
    Standard,
    WorldClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QaConfig {
    pub threshold: Option<f64>,
    #[serde(default)]
    pub layers: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiServerConfig {
    pub workflow: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSink {
    FilesystemPath { path: String },
    CloudKey { key: String },
}

/// Raw wire shape, deserialized permissively (unknown top-level keys are
/// ignored per §6) before [`JobTicket::parse_and_validate`] normalizes it.
#[derive(Debug, Clone, Deserialize)]
struct RawTicket {
    id: String,
    #[serde(rename = "jobType")]
    job_type: Option<String>,
    #[serde(rename = "targetApplication", default)]
    target_application: String,
    #[serde(rename = "workerPreference")]
    worker_preference: Option<String>,
    #[serde(rename = "worldClass", default)]
    world_class: bool,
    #[serde(rename = "mcpMode", default)]
    mcp_mode: bool,
    style: Option<String>,
    quality: Option<String>,
    qa: Option<QaConfig>,
    #[serde(default)]
    timeouts: HashMap<String, u64>,
    #[serde(rename = "featureFlags", default)]
    feature_flags: Vec<String>,
    #[serde(rename = "multi-server")]
    multi_server: Option<MultiServerConfig>,
    output: Option<OutputSink>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// A parsed, validated, and normalized job ticket.
///
/// Mutated only by the orchestrator appending computed fields (this struct
/// already holds the computed `resolved_output` and `effective_qa_threshold`
/// fields filled in at validation time, per §3's lifecycle note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTicket {
    pub id: String,
    pub job_type: JobType,
    pub target_application: String,
    pub worker_preference: WorkerPreference,
    pub world_class: bool,
    pub mcp_mode: bool,
    pub style: Option<String>,
    pub quality: Quality,
    pub quality_tier: QualityTier,
    pub effective_qa_threshold: f64,
    pub qa_layer_overrides: HashMap<String, f64>,
    pub timeouts: HashMap<String, Duration>,
    pub feature_flags: Vec<String>,
    pub multi_server_workflow: Option<String>,
    pub resolved_output: PathBuf,
    pub output_is_cloud: bool,
    pub payload: Option<serde_json::Value>,
}

/// The world-class floor that cannot be lowered by ticket configuration (§4.3, §9).
pub const WORLD_CLASS_FLOOR: f64 = 0.95;

impl JobTicket {
    /// Parse a raw JSON ticket body and validate/normalize it against `config`.
    pub fn parse_and_validate(body: &[u8], config: &Config) -> Result<Self, SchemaError> {
        let raw: RawTicket = serde_json::from_slice(body)
            .map_err(|e| SchemaError::Validation(vec![format!("malformed JSON: {e}")]))?;
        Self::validate(raw, config)
    }

    fn validate(raw: RawTicket, config: &Config) -> Result<Self, SchemaError> {
        let mut violations = Vec::new();

        if raw.id.trim().is_empty() {
            violations.push("id: must be a non-empty string".to_string());
        }

        let job_type = match raw.job_type.as_deref().map(str::to_lowercase) {
            Some(s) => match s.as_str() {
                "partnership-document" => Some(JobType::PartnershipDocument),
                "program-report" => Some(JobType::ProgramReport),
                "annual-report" => Some(JobType::AnnualReport),
                "generic" => Some(JobType::Generic),
                other => {
                    violations.push(format!("jobType: unknown enum value \"{other}\""));
                    None
                }
            },
            None => {
                violations.push("jobType: required field missing".to_string());
                None
            }
        };

        let worker_preference = match raw
            .worker_preference
            .as_deref()
            .map(str::to_lowercase)
            .as_deref()
        {
            None | Some("auto") => WorkerPreference::Auto,
            Some("local-interactive") => WorkerPreference::LocalInteractive,
            Some("serverless-batch") => WorkerPreference::ServerlessBatch,
            Some("multi-server") => WorkerPreference::MultiServer,
            Some(other) => {
                violations.push(format!("workerPreference: unknown enum value \"{other}\""));
                WorkerPreference::Auto
            }
        };

        let quality = match raw.quality.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("standard") => Quality::Standard,
            Some("low") => Quality::Low,
            Some("high") => Quality::High,
            Some(other) => {
                violations.push(format!("quality: unknown enum value \"{other}\""));
                Quality::Standard
            }
        };

        if let Some(qa) = &raw.qa
            && let Some(t) = qa.threshold
            && !(0.0..=1.0).contains(&t)
        {
            violations.push(format!("qa.threshold: {t} is outside [0,1]"));
        }

        let resolved = match &raw.output {
            Some(OutputSink::FilesystemPath { path }) => {
                match resolve_within_roots(path, &config.allowed_output_roots) {
                    Ok(p) => Some((p, false)),
                    Err(e) => {
                        violations.push(e);
                        None
                    }
                }
            }
            Some(OutputSink::CloudKey { key }) => Some((PathBuf::from(key), true)),
            None => {
                violations.push(
                    "output: required field missing (need a destination path or cloud key)"
                        .to_string(),
                );
                None
            }
        };

        if !violations.is_empty() {
            return Err(SchemaError::Validation(violations));
        }

        let job_type = job_type.expect("validated above");
        let (resolved_output, output_is_cloud) = resolved.expect("validated above");

        let quality_tier = if raw.world_class {
            QualityTier::WorldClass
        } else {
            match quality {
                Quality::Low => QualityTier::Draft,
                Quality::Standard | Quality::High => QualityTier::Standard,
            }
        };

        let default_threshold = config.qa_defaults.default_for(quality_tier);
        let supplied_threshold = raw.qa.as_ref().and_then(|q| q.threshold);
        let effective_qa_threshold = if raw.world_class {
            supplied_threshold
                .unwrap_or(default_threshold)
                .max(WORLD_CLASS_FLOOR)
        } else {
            supplied_threshold.unwrap_or(default_threshold)
        };

        let qa_layer_overrides = raw.qa.map(|q| q.layers).unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        let feature_flags = raw
            .feature_flags
            .into_iter()
            .filter(|f| seen.insert(f.clone()))
            .collect();

        let timeouts = raw
            .timeouts
            .into_iter()
            .map(|(k, ms)| (k, Duration::from_millis(ms)))
            .collect();

        Ok(JobTicket {
            id: raw.id,
            job_type,
            target_application: raw.target_application,
            worker_preference,
            world_class: raw.world_class,
            mcp_mode: raw.mcp_mode,
            style: raw.style,
            quality,
            quality_tier,
            effective_qa_threshold,
            qa_layer_overrides,
            timeouts,
            feature_flags,
            multi_server_workflow: raw.multi_server.and_then(|m| m.workflow),
            resolved_output,
            output_is_cloud,
            payload: raw.payload,
        })
    }

    /// `true` when this ticket's style mandates the TFU multi-server
    /// failsafe (§4.4 rule #2): no fallback to another worker kind on failure.
    pub fn is_tfu(&self) -> bool {
        self.style.as_deref() == Some("TFU")
    }
}

/// Resolve `raw_path` against `roots`, rejecting traversal segments and
/// paths that don't land inside any allow-listed root (§4.3).
fn resolve_within_roots(raw_path: &str, roots: &[PathBuf]) -> Result<PathBuf, String> {
    let candidate = Path::new(raw_path);

    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(format!(
            "output.path: \"{raw_path}\" contains a traversal segment"
        ));
    }

    if candidate.is_absolute() {
        return roots
            .iter()
            .find(|root| candidate.starts_with(root))
            .map(|_| candidate.to_path_buf())
            .ok_or_else(|| {
                format!("output.path: \"{raw_path}\" does not resolve within an allow-listed root")
            });
    }

    let root = roots
        .first()
        .ok_or_else(|| "output.path: no allow-listed output root configured".to_string())?;
    Ok(root.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::for_testing(PathBuf::from("/tmp/docforge-test-out"))
    }

    fn valid_body(overrides: &str) -> Vec<u8> {
        let base = serde_json::json!({
            "id": "j1",
            "jobType": "partnership-document",
            "output": {"path": "out/j1.pdf"},
        });
        let mut merged = base.as_object().unwrap().clone();
        let extra: serde_json::Value = serde_json::from_str(overrides).unwrap();
        for (k, v) in extra.as_object().unwrap() {
            merged.insert(k.clone(), v.clone());
        }
        serde_json::to_vec(&merged).unwrap()
    }

    #[test]
    fn missing_required_fields_fail() {
        let config = test_config();
        let body = br#"{"id": "", "output": {}}"#;
        let err = JobTicket::parse_and_validate(body, &config).unwrap_err();
        match err {
            SchemaError::Validation(v) => {
                assert!(v.iter().any(|m| m.contains("id")));
                assert!(v.iter().any(|m| m.contains("jobType")));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn world_class_clamps_threshold_up_to_floor() {
        let config = test_config();
        let body = valid_body(r#"{"worldClass": true, "qa": {"threshold": 0.90}}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert_eq!(ticket.effective_qa_threshold, WORLD_CLASS_FLOOR);
    }

    #[test]
    fn world_class_honors_a_higher_user_supplied_threshold() {
        let config = test_config();
        let body = valid_body(r#"{"worldClass": true, "qa": {"threshold": 0.99}}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert_eq!(ticket.effective_qa_threshold, 0.99);
    }

    #[test]
    fn non_world_class_uses_supplied_or_default_threshold() {
        let config = test_config();
        let body = valid_body(r#"{}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert_eq!(ticket.effective_qa_threshold, 0.90);
    }

    #[test]
    fn draft_quality_defaults_to_the_draft_threshold_not_standard() {
        let config = test_config();
        let body = valid_body(r#"{"quality": "low"}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert_eq!(ticket.quality_tier, QualityTier::Draft);
        assert_eq!(ticket.effective_qa_threshold, config.qa_defaults.draft);
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let config = test_config();
        let body = valid_body(r#"{"qa": {"threshold": 1.5}}"#);
        let err = JobTicket::parse_and_validate(&body, &config).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let config = test_config();
        let body = serde_json::to_vec(&serde_json::json!({
            "id": "j1",
            "jobType": "generic",
            "output": {"path": "../../etc/passwd"},
        }))
        .unwrap();
        let err = JobTicket::parse_and_validate(&body, &config).unwrap_err();
        match err {
            SchemaError::Validation(v) => assert!(v.iter().any(|m| m.contains("traversal"))),
            _ => panic!("expected validation error"),
        }
    }

    #[test]
    fn unknown_qa_subfield_is_rejected() {
        let body = br#"{"id":"j1","jobType":"generic","output":{"path":"o.pdf"},"qa":{"bogus":1}}"#;
        let err: Result<JobTicket, SchemaError> =
            JobTicket::parse_and_validate(body, &test_config());
        assert!(err.is_err());
    }

    #[test]
    fn feature_flags_dedupe_preserving_order() {
        let config = test_config();
        let body = valid_body(r#"{"featureFlags": ["l1", "l2", "l1"]}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert_eq!(ticket.feature_flags, vec!["l1".to_string(), "l2".to_string()]);
    }

    #[test]
    fn tfu_style_is_detected() {
        let config = test_config();
        let body = valid_body(r#"{"style": "TFU"}"#);
        let ticket = JobTicket::parse_and_validate(&body, &config).unwrap();
        assert!(ticket.is_tfu());
    }
}
