//! Persistent key layout
//!
//! One place for every key the service writes, so backends and tests agree
//! on the schema.

/// Pub/sub channel carrying registry events across processes
pub const EVENTS_CHANNEL: &str = "arcp:events";

/// Capped list of recent alerts
pub const ALERTS_KEY: &str = "alerts";

/// Capped list of recent log entries
pub const LOGS_KEY: &str = "logs";

/// Hash holding the fields of an agent record
#[must_use]
pub fn agent(id: &str) -> String {
    format!("agent:{id}")
}

/// Blob holding the packed f32 embedding of an agent
#[must_use]
pub fn embedding(id: &str) -> String {
    format!("embed:{id}")
}

/// Set of agent ids for one agent type
#[must_use]
pub fn type_index(agent_type: &str) -> String {
    format!("idx:type:{agent_type}")
}

/// Set of agent ids advertising one capability
#[must_use]
pub fn capability_index(capability: &str) -> String {
    format!("idx:cap:{capability}")
}

/// Hash holding the metric counters of an agent
#[must_use]
pub fn metrics(id: &str) -> String {
    format!("metrics:{id}")
}

/// Hash holding one admin session
#[must_use]
pub fn session(jti: &str) -> String {
    format!("session:{jti}")
}

/// Blob holding one single-use temp token (TTL-bound)
#[must_use]
pub fn temp_token(jti: &str) -> String {
    format!("temptoken:{jti}")
}

/// Sorted set of attempt timestamps for one principal or source
#[must_use]
pub fn attempts(principal: &str) -> String {
    format!("attempts:{principal}")
}

/// Hash holding the failure streak and lockout deadline for one principal
#[must_use]
pub fn attempt_state(principal: &str) -> String {
    format!("attempts:state:{principal}")
}

/// Marker for a revoked token id (TTL-bound)
#[must_use]
pub fn revoked(jti: &str) -> String {
    format!("revoked:{jti}")
}

/// Fixed-window rate limit counter
#[must_use]
pub fn rate_window(principal: &str, window: u64) -> String {
    format!("rate:{principal}:{window}")
}

/// Token bucket state for one principal
#[must_use]
pub fn rate_bucket(principal: &str) -> String {
    format!("bucket:{principal}")
}
