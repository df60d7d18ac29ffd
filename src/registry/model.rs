//! Agent records, metrics, and validation
//!
//! Records persist as string-keyed hash fields (`agent:{id}`), so every
//! struct here knows how to map itself to and from field pairs. Complex
//! fields (lists, metadata, requirements) are JSON-encoded inside their
//! hash field.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use http::Uri;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reputation formula weights: success rate, latency, volume
const REPUTATION_WEIGHTS: (f64, f64, f64) = (0.6, 0.3, 0.1);
/// EWMA smoothing factor for average response time
const RESPONSE_TIME_ALPHA: f64 = 0.2;
/// Request volume that saturates the volume score
const VOLUME_SATURATION: f64 = 1000.0;

const MAX_AGENT_ID_LEN: usize = 64;
const MIN_PUBLIC_KEY_LEN: usize = 32;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Alive,
    Dead,
    /// UI-layer label meaning "cannot observe"; never persisted by the core
    #[default]
    Unknown,
}

impl AgentStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "alive" => Self::Alive,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// How the agent is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationMode {
    #[default]
    Remote,
    Local,
    Hybrid,
}

/// Runtime requirements advertised by an agent
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AgentRequirements {
    #[serde(default)]
    pub system_requirements: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub minimum_memory_mb: Option<u64>,
    #[serde(default)]
    pub requires_internet: bool,
}

/// Payload submitted to `POST /agents/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub agent_id: String,
    pub agent_type: String,
    #[serde(default)]
    pub owner: String,
    pub public_key: String,
    #[serde(default)]
    pub version: String,
    pub endpoint: String,
    #[serde(default)]
    pub communication_mode: CommunicationMode,
    #[serde(default)]
    pub name: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub language_support: Vec<String>,
    #[serde(default)]
    pub policy_tags: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub requirements: Option<AgentRequirements>,
    #[serde(default)]
    pub context_brief: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RegistrationRequest {
    /// Validate the submitted record against the configured allowlist
    pub fn validate(&self, allowed_types: &[String]) -> Result<()> {
        if self.agent_id.is_empty() || self.agent_id.len() > MAX_AGENT_ID_LEN {
            return Err(Error::Validation(format!(
                "agent_id must be 1..={MAX_AGENT_ID_LEN} characters"
            )));
        }
        if !self
            .agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(
                "agent_id may only contain alphanumerics, '-' and '_'".into(),
            ));
        }
        if !allowed_types.contains(&self.agent_type) {
            return Err(Error::TypeNotAllowed(self.agent_type.clone()));
        }
        if self.public_key.len() < MIN_PUBLIC_KEY_LEN {
            return Err(Error::Validation(format!(
                "public_key must be at least {MIN_PUBLIC_KEY_LEN} characters"
            )));
        }
        if self.capabilities.is_empty() {
            return Err(Error::Validation("capabilities must not be empty".into()));
        }
        let uri: Uri = self
            .endpoint
            .parse()
            .map_err(|_| Error::Validation("endpoint must be an absolute URL".into()))?;
        match (uri.scheme_str(), uri.authority()) {
            (Some("http") | Some("https"), Some(_)) => {}
            _ => {
                return Err(Error::Validation(
                    "endpoint must be an absolute http(s) URL".into(),
                ));
            }
        }
        Ok(())
    }

    /// Text document fed to the embedder: brief plus the tag sets
    #[must_use]
    pub fn embedding_document(&self) -> String {
        let mut parts = vec![self.context_brief.clone()];
        parts.push(self.capabilities.join(" "));
        parts.push(self.features.join(" "));
        parts.push(self.policy_tags.join(" "));
        parts.retain(|p| !p.is_empty());
        parts.join(" | ")
    }
}

/// A registered agent as owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub owner: String,
    pub public_key: String,
    pub version: String,
    pub endpoint: String,
    pub communication_mode: CommunicationMode,
    pub name: String,
    pub capabilities: Vec<String>,
    pub features: Vec<String>,
    pub language_support: Vec<String>,
    pub policy_tags: Vec<String>,
    pub max_tokens: Option<u32>,
    pub rate_limit: Option<u32>,
    pub requirements: Option<AgentRequirements>,
    pub context_brief: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl AgentRecord {
    /// Materialize a record from a validated registration request
    #[must_use]
    pub fn from_request(request: RegistrationRequest, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: request.agent_id,
            agent_type: request.agent_type,
            owner: request.owner,
            public_key: request.public_key,
            version: request.version,
            endpoint: request.endpoint,
            communication_mode: request.communication_mode,
            name: request.name,
            capabilities: request.capabilities,
            features: request.features,
            language_support: request.language_support,
            policy_tags: request.policy_tags,
            max_tokens: request.max_tokens,
            rate_limit: request.rate_limit,
            requirements: request.requirements,
            context_brief: request.context_brief,
            metadata: request.metadata,
            status: AgentStatus::Alive,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Flatten to hash fields for `agent:{id}`
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("agent_id".into(), self.agent_id.clone()),
            ("agent_type".into(), self.agent_type.clone()),
            ("owner".into(), self.owner.clone()),
            ("public_key".into(), self.public_key.clone()),
            ("version".into(), self.version.clone()),
            ("endpoint".into(), self.endpoint.clone()),
            (
                "communication_mode".into(),
                serde_json::to_string(&self.communication_mode)?
                    .trim_matches('"')
                    .to_string(),
            ),
            ("name".into(), self.name.clone()),
            ("capabilities".into(), serde_json::to_string(&self.capabilities)?),
            ("features".into(), serde_json::to_string(&self.features)?),
            (
                "language_support".into(),
                serde_json::to_string(&self.language_support)?,
            ),
            ("policy_tags".into(), serde_json::to_string(&self.policy_tags)?),
            ("context_brief".into(), self.context_brief.clone()),
            ("metadata".into(), serde_json::to_string(&self.metadata)?),
            ("status".into(), self.status.as_str().to_string()),
            ("registered_at".into(), self.registered_at.to_rfc3339()),
            ("last_seen".into(), self.last_seen.to_rfc3339()),
        ];
        if let Some(max_tokens) = self.max_tokens {
            fields.push(("max_tokens".into(), max_tokens.to_string()));
        }
        if let Some(rate_limit) = self.rate_limit {
            fields.push(("rate_limit".into(), rate_limit.to_string()));
        }
        if let Some(requirements) = &self.requirements {
            fields.push(("requirements".into(), serde_json::to_string(requirements)?));
        }
        Ok(fields)
    }

    /// Rebuild from hash fields; missing optional fields get defaults
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| -> String { fields.get(name).cloned().unwrap_or_default() };
        let json_list = |name: &str| -> Vec<String> {
            fields
                .get(name)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default()
        };
        let parse_time = |name: &str| -> Result<DateTime<Utc>> {
            fields
                .get(name)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| Error::Storage(format!("agent record missing '{name}'")))
        };

        let agent_id = get("agent_id");
        if agent_id.is_empty() {
            return Err(Error::Storage("agent record missing 'agent_id'".into()));
        }

        Ok(Self {
            agent_id,
            agent_type: get("agent_type"),
            owner: get("owner"),
            public_key: get("public_key"),
            version: get("version"),
            endpoint: get("endpoint"),
            communication_mode: fields
                .get("communication_mode")
                .and_then(|raw| serde_json::from_str(&format!("\"{raw}\"")).ok())
                .unwrap_or_default(),
            name: get("name"),
            capabilities: json_list("capabilities"),
            features: json_list("features"),
            language_support: json_list("language_support"),
            policy_tags: json_list("policy_tags"),
            max_tokens: fields.get("max_tokens").and_then(|v| v.parse().ok()),
            rate_limit: fields.get("rate_limit").and_then(|v| v.parse().ok()),
            requirements: fields
                .get("requirements")
                .and_then(|raw| serde_json::from_str(raw).ok()),
            context_brief: get("context_brief"),
            metadata: fields
                .get("metadata")
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
            status: AgentStatus::parse(&get("status")),
            registered_at: parse_time("registered_at")?,
            last_seen: parse_time("last_seen")?,
        })
    }
}

/// The subset of an agent record exposed to anonymous discovery consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicAgentView {
    pub agent_id: String,
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub context_brief: String,
    pub version: String,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
}

impl From<&AgentRecord> for PublicAgentView {
    fn from(record: &AgentRecord) -> Self {
        Self {
            agent_id: record.agent_id.clone(),
            name: record.name.clone(),
            agent_type: record.agent_type.clone(),
            capabilities: record.capabilities.clone(),
            context_brief: record.context_brief.clone(),
            version: record.version.clone(),
            status: record.status,
            last_seen: record.last_seen,
        }
    }
}

/// Per-agent metric counters, updated via authenticated reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_time_s: f64,
    pub reputation_score: f64,
    pub last_active: DateTime<Utc>,
}

impl AgentMetrics {
    /// Fresh counters for a newly registered agent
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            error_count: 0,
            avg_response_time_s: 0.0,
            reputation_score: 0.0,
            last_active: now,
        }
    }

    /// Fraction of requests that succeeded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / (self.total_requests.max(1)) as f64
    }

    /// Fraction of requests that failed
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Fold one request outcome into the counters
    ///
    /// `total_requests` is monotonic; the average response time is an EWMA
    /// seeded by the first observation; the reputation score is recomputed
    /// and clamped to [0, 1].
    pub fn record(&mut self, response_time_s: f64, success: bool, now: DateTime<Utc>) {
        self.total_requests += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }

        let response_time_s = response_time_s.max(0.0);
        if self.total_requests == 1 {
            self.avg_response_time_s = response_time_s;
        } else {
            self.avg_response_time_s = RESPONSE_TIME_ALPHA * response_time_s
                + (1.0 - RESPONSE_TIME_ALPHA) * self.avg_response_time_s;
        }

        let (w_success, w_latency, w_volume) = REPUTATION_WEIGHTS;
        let latency_score = 1.0 / (1.0 + self.avg_response_time_s);
        let volume_score = (self.total_requests as f64 / VOLUME_SATURATION).min(1.0);
        self.reputation_score = (w_success * self.success_rate()
            + w_latency * latency_score
            + w_volume * volume_score)
            .clamp(0.0, 1.0);

        self.last_active = now;
    }

    /// Flatten to hash fields for `metrics:{id}`
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("total_requests".into(), self.total_requests.to_string()),
            ("success_count".into(), self.success_count.to_string()),
            ("error_count".into(), self.error_count.to_string()),
            (
                "avg_response_time_s".into(),
                self.avg_response_time_s.to_string(),
            ),
            ("reputation_score".into(), self.reputation_score.to_string()),
            ("last_active".into(), self.last_active.to_rfc3339()),
        ]
    }

    /// Rebuild from hash fields; absent fields read as zero
    #[must_use]
    pub fn from_fields(fields: &HashMap<String, String>, fallback_time: DateTime<Utc>) -> Self {
        let num = |name: &str| -> u64 {
            fields
                .get(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        let float = |name: &str| -> f64 {
            fields
                .get(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0)
        };
        Self {
            total_requests: num("total_requests"),
            success_count: num("success_count"),
            error_count: num("error_count"),
            avg_response_time_s: float("avg_response_time_s"),
            reputation_score: float("reputation_score"),
            last_active: fields
                .get("last_active")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(fallback_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            agent_id: "echo-1".into(),
            agent_type: "testing".into(),
            owner: "tests".into(),
            public_key: "k".repeat(40),
            version: "1.0.0".into(),
            endpoint: "http://localhost:9000".into(),
            communication_mode: CommunicationMode::Remote,
            name: "Echo".into(),
            capabilities: vec!["echo".into()],
            features: vec![],
            language_support: vec!["en".into()],
            policy_tags: vec![],
            max_tokens: None,
            rate_limit: Some(60),
            requirements: None,
            context_brief: "toy".into(),
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(request().validate(&["testing".into()]).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let allowed = vec!["testing".to_string()];

        let mut bad = request();
        bad.agent_type = "other".into();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.public_key = "short".into();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.capabilities.clear();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.endpoint = "not a url".into();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.endpoint = "ftp://example.com".into();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.agent_id = "bad id!".into();
        assert!(bad.validate(&allowed).is_err());

        let mut bad = request();
        bad.agent_id = "x".repeat(65);
        assert!(bad.validate(&allowed).is_err());
    }

    #[test]
    fn test_embedding_document_joins_parts() {
        let mut req = request();
        req.features = vec!["fast".into()];
        let doc = req.embedding_document();
        assert_eq!(doc, "toy | echo | fast");
    }

    #[test]
    fn test_record_field_roundtrip() {
        let mut req = request();
        req.metadata
            .insert("team".into(), serde_json::Value::String("infra".into()));
        req.requirements = Some(AgentRequirements {
            requires_internet: true,
            ..Default::default()
        });
        let record = AgentRecord::from_request(req, Utc::now());

        let fields: HashMap<String, String> = record.to_fields().unwrap().into_iter().collect();
        let rebuilt = AgentRecord::from_fields(&fields).unwrap();
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_metrics_record_monotonic_and_clamped() {
        let mut metrics = AgentMetrics::new(Utc::now());
        metrics.record(0.5, true, Utc::now());
        metrics.record(1.5, false, Utc::now());
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.error_count, 1);
        assert!((0.0..=1.0).contains(&metrics.reputation_score));
        assert!((metrics.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_ewma_seeded_by_first_sample() {
        let mut metrics = AgentMetrics::new(Utc::now());
        metrics.record(2.0, true, Utc::now());
        assert!((metrics.avg_response_time_s - 2.0).abs() < 1e-9);
        metrics.record(1.0, true, Utc::now());
        // 0.2 * 1.0 + 0.8 * 2.0
        assert!((metrics.avg_response_time_s - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_field_roundtrip() {
        let mut metrics = AgentMetrics::new(Utc::now());
        metrics.record(0.25, true, Utc::now());
        let fields: HashMap<String, String> = metrics.to_fields().into_iter().collect();
        let rebuilt = AgentMetrics::from_fields(&fields, Utc::now());
        assert_eq!(rebuilt.total_requests, 1);
        assert!((rebuilt.avg_response_time_s - 0.25).abs() < 1e-9);
        assert!((rebuilt.reputation_score - metrics.reputation_score).abs() < 1e-9);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&AgentStatus::Alive).unwrap(), "\"alive\"");
        assert_eq!(AgentStatus::parse("dead"), AgentStatus::Dead);
        assert_eq!(AgentStatus::parse("???"), AgentStatus::Unknown);
    }
}
