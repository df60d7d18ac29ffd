//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//! 1. Well-known flat environment variables (`JWT_SECRET`, `AGENT_KEYS`, ...)
//! 2. Environment variables with the `ARCP_` prefix (`ARCP_SERVICE__PORT`)
//! 3. Current working directory: ./config.toml
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Testing,
    Prod,
}

impl Environment {
    /// Whether weak secrets are tolerated (dev/testing only)
    #[must_use]
    pub fn allows_insecure_defaults(&self) -> bool {
        !matches!(self, Self::Prod)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Semantic search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Rate limiting and login backoff configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Per-hub WebSocket configuration
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Redis configuration (optional; in-memory fallback when absent)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Embedder provider configuration (optional; search falls back to
    /// token overlap when absent)
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name used in logs and health output
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub log_json: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// CORS mode: "permissive", "restrictive"
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,

    /// Allowed origins when `cors_mode` is "restrictive"
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Request body size limit in megabytes
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Source IPs always rejected
    #[serde(default)]
    pub ip_denylist: Vec<String>,

    /// When non-empty, only these source IPs are admitted
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            timeout_secs: default_timeout(),
            environment: Environment::default(),
            cors_mode: default_cors_mode(),
            allowed_origins: Vec::new(),
            body_limit_mb: default_body_limit_mb(),
            ip_denylist: Vec::new(),
            ip_allowlist: Vec::new(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for token signing; required outside dev
    #[serde(default)]
    pub jwt_secret: String,

    /// JWT algorithm (HS256, HS384, HS512)
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    /// Access token lifetime in minutes
    #[serde(default = "default_jwt_expire_minutes")]
    pub jwt_expire_minutes: u64,

    /// Admin username
    #[serde(default)]
    pub admin_username: String,

    /// Admin password (plaintext, hashed at startup) or a PHC `$argon2id$...`
    /// hash
    #[serde(default)]
    pub admin_password: String,

    /// Registration keys accepted by `request_temp_token`
    #[serde(default)]
    pub agent_keys: Vec<String>,

    /// Bearer token for the Prometheus scrape endpoint
    #[serde(default)]
    pub metrics_scrape_token: Option<String>,

    /// Temp token lifetime in minutes (capped at 15)
    #[serde(default = "default_temp_token_minutes")]
    pub temp_token_minutes: u64,

    /// Admin session idle timeout in minutes
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,

    /// Maximum concurrent admin sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// PIN verification attempts before cooldown
    #[serde(default = "default_pin_max_attempts")]
    pub pin_max_attempts: u32,

    /// PIN cooldown in seconds after too many failures
    #[serde(default = "default_pin_cooldown_secs")]
    pub pin_cooldown_secs: u64,

    /// Maximum age of a PIN verification for destructive admission, seconds
    #[serde(default = "default_pin_max_age_secs")]
    pub pin_max_age_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: default_jwt_algorithm(),
            jwt_expire_minutes: default_jwt_expire_minutes(),
            admin_username: String::new(),
            admin_password: String::new(),
            agent_keys: Vec::new(),
            metrics_scrape_token: None,
            temp_token_minutes: default_temp_token_minutes(),
            session_timeout_minutes: default_session_timeout_minutes(),
            max_sessions: default_max_sessions(),
            pin_max_attempts: default_pin_max_attempts(),
            pin_cooldown_secs: default_pin_cooldown_secs(),
            pin_max_age_secs: default_pin_max_age_secs(),
        }
    }
}

impl AuthConfig {
    /// Temp token lifetime, clamped to the 15 minute ceiling
    #[must_use]
    pub fn temp_token_ttl(&self) -> Duration {
        Duration::from_secs(self.temp_token_minutes.min(15) * 60)
    }

    /// Access token lifetime
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.jwt_expire_minutes * 60)
    }

    /// PIN verification freshness window
    #[must_use]
    pub fn pin_max_age(&self) -> Duration {
        Duration::from_secs(self.pin_max_age_secs)
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Allowed agent types; registration of any other type is rejected
    #[serde(default = "default_agent_types")]
    pub allowed_agent_types: Vec<String>,

    /// Seconds without a heartbeat before an agent is marked dead
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Sweeper cadence in seconds; 0 derives `heartbeat_timeout / 2` (≥ 15)
    #[serde(default)]
    pub cleanup_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            allowed_agent_types: default_agent_types(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            cleanup_interval_secs: 0,
        }
    }
}

impl RegistryConfig {
    /// Heartbeat timeout as a Duration
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Effective sweeper cadence: explicit value, or half the heartbeat
    /// timeout, never below 15 seconds
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        let secs = if self.cleanup_interval_secs > 0 {
            self.cleanup_interval_secs
        } else {
            self.heartbeat_timeout_secs / 2
        };
        Duration::from_secs(secs.max(15))
    }
}

/// Semantic search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Hard ceiling on requested `top_k`
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Default minimum similarity score
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            min_similarity: default_min_similarity(),
        }
    }
}

/// Rate limiting and login backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute per principal (fixed window)
    #[serde(default = "default_rpm")]
    pub rpm: u32,

    /// Token bucket burst size
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Base delay in seconds for exponential login backoff
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Cap on the exponential backoff delay, seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Consecutive failures before a lockout window begins
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,

    /// Lockout window duration, seconds
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,

    /// Sliding window over which attempts are counted, seconds
    #[serde(default = "default_attempt_window_secs")]
    pub attempt_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm: default_rpm(),
            burst: default_burst(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            lockout_threshold: default_lockout_threshold(),
            lockout_secs: default_lockout_secs(),
            attempt_window_secs: default_attempt_window_secs(),
        }
    }
}

/// Per-hub WebSocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Public hub (unauthenticated discovery stream)
    #[serde(default = "HubConfig::public_default")]
    pub public: HubConfig,

    /// Agent hub (token-authenticated agent stream)
    #[serde(default = "HubConfig::agent_default")]
    pub agent: HubConfig,

    /// Dashboard hub (admin monitoring stream)
    #[serde(default = "HubConfig::dashboard_default")]
    pub dashboard: HubConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            public: HubConfig::public_default(),
            agent: HubConfig::agent_default(),
            dashboard: HubConfig::dashboard_default(),
        }
    }
}

/// Settings for one WebSocket hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,

    /// Ping cadence in seconds
    pub ping_interval_secs: u64,

    /// Periodic broadcast cadence in seconds (stats/monitoring frames)
    pub broadcast_interval_secs: u64,

    /// Seconds a client has to complete the authentication handshake
    pub auth_deadline_secs: u64,

    /// Outbound queue capacity per connection
    pub queue_capacity: usize,

    /// Consecutive missed pongs that emit a warning alert
    pub pong_warn_threshold: u32,

    /// Consecutive missed pongs that force a close
    pub pong_close_threshold: u32,
}

impl HubConfig {
    fn base(max_connections: usize) -> Self {
        Self {
            max_connections,
            ping_interval_secs: 30,
            broadcast_interval_secs: 10,
            auth_deadline_secs: 10,
            queue_capacity: 256,
            pong_warn_threshold: 3,
            pong_close_threshold: 7,
        }
    }

    /// Defaults for the public hub
    #[must_use]
    pub fn public_default() -> Self {
        Self::base(100)
    }

    /// Defaults for the agent hub
    #[must_use]
    pub fn agent_default() -> Self {
        Self::base(100)
    }

    /// Defaults for the dashboard hub
    #[must_use]
    pub fn dashboard_default() -> Self {
        let mut cfg = Self::base(5);
        cfg.broadcast_interval_secs = 5;
        cfg
    }

    /// Ping cadence as a Duration
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Broadcast cadence as a Duration
    #[must_use]
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    /// Handshake deadline as a Duration
    #[must_use]
    pub fn auth_deadline(&self) -> Duration {
        Duration::from_secs(self.auth_deadline_secs)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis://host:port)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Maximum retry attempts for establishing the connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Embedder provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Provider endpoint URL
    pub endpoint: String,

    /// Bearer credential for the provider
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name sent to the provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected embedding dimension D
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Per-call timeout in seconds
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Config {
    /// Load configuration from defaults, `config.toml`, and the environment
    pub fn load() -> Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("ARCP_").split("__"))
            .extract()?;

        config.apply_flat_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply the well-known flat environment variables that deployments use
    /// (`JWT_SECRET`, `AGENT_KEYS`, ...); these win over every other source.
    pub fn apply_flat_env(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }
        fn csv(value: &str) -> Vec<String> {
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }

        if let Some(v) = var("ENVIRONMENT") {
            match v.to_lowercase().as_str() {
                "prod" | "production" => self.service.environment = Environment::Prod,
                "testing" | "test" => self.service.environment = Environment::Testing,
                _ => self.service.environment = Environment::Dev,
            }
        }
        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = var("JWT_ALGORITHM") {
            self.auth.jwt_algorithm = v;
        }
        if let Some(v) = var("JWT_EXPIRE_MINUTES").and_then(|v| v.parse().ok()) {
            self.auth.jwt_expire_minutes = v;
        }
        if let Some(v) = var("ADMIN_USERNAME") {
            self.auth.admin_username = v;
        }
        if let Some(v) = var("ADMIN_PASSWORD") {
            self.auth.admin_password = v;
        }
        if let Some(v) = var("ALLOWED_AGENT_TYPES") {
            self.registry.allowed_agent_types = csv(&v);
        }
        if let Some(v) = var("AGENT_KEYS") {
            self.auth.agent_keys = csv(&v);
        }
        if let Some(v) = var("AGENT_HEARTBEAT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.registry.heartbeat_timeout_secs = v;
        }
        if let Some(v) = var("AGENT_CLEANUP_INTERVAL").and_then(|v| v.parse().ok()) {
            self.registry.cleanup_interval_secs = v;
        }
        if let Some(v) = var("VECTOR_SEARCH_TOP_K").and_then(|v| v.parse().ok()) {
            self.search.top_k = v;
        }
        if let Some(v) = var("VECTOR_SEARCH_MIN_SIMILARITY").and_then(|v| v.parse().ok()) {
            self.search.min_similarity = v;
        }
        if let Some(v) = var("RATE_LIMIT_RPM").and_then(|v| v.parse().ok()) {
            self.rate_limit.rpm = v;
        }
        if let Some(v) = var("RATE_LIMIT_BURST").and_then(|v| v.parse().ok()) {
            self.rate_limit.burst = v;
        }
        if let Some(v) = var("SESSION_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.auth.session_timeout_minutes = v;
        }
        if let Some(v) = var("MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            self.auth.max_sessions = v;
        }
        if let Some(v) = var("METRICS_SCRAPE_TOKEN") {
            self.auth.metrics_scrape_token = Some(v);
        }
        if let Some(url) = var("REDIS_URL") {
            match &mut self.redis {
                Some(redis) => redis.url = url,
                None => {
                    self.redis = Some(RedisConfig {
                        url,
                        max_connections: default_redis_max_connections(),
                        max_retries: default_max_retries(),
                        retry_delay_secs: default_retry_delay(),
                    })
                }
            }
        }
        if let Some(endpoint) = var("EMBEDDER_ENDPOINT") {
            let cfg = self.embedder.get_or_insert_with(|| EmbedderConfig {
                endpoint: String::new(),
                api_key: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embed_timeout(),
            });
            cfg.endpoint = endpoint;
            if let Some(key) = var("EMBEDDER_API_KEY") {
                cfg.api_key = Some(key);
            }
            if let Some(dim) = var("EMBEDDING_DIMENSION").and_then(|v| v.parse().ok()) {
                cfg.dimension = dim;
            }
        }
    }

    /// Fail fast on configuration that cannot serve requests safely
    pub fn validate(&self) -> Result<()> {
        let insecure_ok = self.service.environment.allows_insecure_defaults();

        if self.auth.jwt_secret.is_empty() && !insecure_ok {
            return Err(config_error("JWT_SECRET must be set outside dev"));
        }
        if !self.auth.jwt_secret.is_empty() && self.auth.jwt_secret.len() < 32 && !insecure_ok {
            return Err(config_error("JWT_SECRET must be at least 32 bytes"));
        }
        if self.registry.allowed_agent_types.is_empty() {
            return Err(config_error("ALLOWED_AGENT_TYPES must not be empty"));
        }
        if self.registry.heartbeat_timeout_secs == 0 {
            return Err(config_error("AGENT_HEARTBEAT_TIMEOUT must be positive"));
        }
        if (self.auth.admin_username.is_empty() || self.auth.admin_password.is_empty())
            && !insecure_ok
        {
            return Err(config_error(
                "ADMIN_USERNAME and ADMIN_PASSWORD must be set outside dev",
            ));
        }
        if self.search.max_top_k == 0 {
            return Err(config_error("search.max_top_k must be positive"));
        }
        match self.auth.jwt_algorithm.to_uppercase().as_str() {
            "HS256" | "HS384" | "HS512" => {}
            other => {
                return Err(config_error(format!("Unsupported JWT algorithm: {other}")));
            }
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(Box::new(figment::Error::from(msg.into())))
}

// Default value functions

fn default_service_name() -> String {
    "arcp".to_string()
}

const fn default_port() -> u16 {
    8001
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_timeout() -> u64 {
    30
}

fn default_cors_mode() -> String {
    "restrictive".to_string()
}

const fn default_body_limit_mb() -> usize {
    2
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

const fn default_jwt_expire_minutes() -> u64 {
    60
}

const fn default_temp_token_minutes() -> u64 {
    15
}

const fn default_session_timeout_minutes() -> u64 {
    60
}

const fn default_max_sessions() -> usize {
    10
}

const fn default_pin_max_attempts() -> u32 {
    5
}

const fn default_pin_cooldown_secs() -> u64 {
    300
}

const fn default_pin_max_age_secs() -> u64 {
    900
}

fn default_agent_types() -> Vec<String> {
    vec!["testing".to_string()]
}

const fn default_heartbeat_timeout() -> u64 {
    60
}

const fn default_top_k() -> usize {
    3
}

const fn default_max_top_k() -> usize {
    100
}

const fn default_min_similarity() -> f32 {
    0.5
}

const fn default_rpm() -> u32 {
    120
}

const fn default_burst() -> u32 {
    20
}

const fn default_backoff_base_secs() -> u64 {
    1
}

const fn default_backoff_cap_secs() -> u64 {
    300
}

const fn default_lockout_threshold() -> u32 {
    5
}

const fn default_lockout_secs() -> u64 {
    900
}

const fn default_attempt_window_secs() -> u64 {
    900
}

const fn default_redis_max_connections() -> usize {
    16
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    1
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

const fn default_embedding_dimension() -> usize {
    384
}

const fn default_embed_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_dev_safe() {
        let config = Config::default();
        assert_eq!(config.service.environment, Environment::Dev);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prod_requires_secret() {
        let mut config = Config::default();
        config.service.environment = Environment::Prod;
        config.auth.admin_username = "admin".into();
        config.auth.admin_password = "hunter2hunter2".into();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sweep_interval_floor() {
        let registry = RegistryConfig {
            heartbeat_timeout_secs: 10,
            ..Default::default()
        };
        assert_eq!(registry.sweep_interval(), Duration::from_secs(15));

        let registry = RegistryConfig {
            heartbeat_timeout_secs: 120,
            ..Default::default()
        };
        assert_eq!(registry.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_temp_token_ttl_capped() {
        let auth = AuthConfig {
            temp_token_minutes: 45,
            ..Default::default()
        };
        assert_eq!(auth.temp_token_ttl(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_hub_defaults() {
        let ws = WebSocketConfig::default();
        assert_eq!(ws.public.max_connections, 100);
        assert_eq!(ws.dashboard.max_connections, 5);
        assert_eq!(ws.dashboard.queue_capacity, 256);
        assert_eq!(ws.agent.pong_close_threshold, 7);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let mut config = Config::default();
        config.auth.jwt_algorithm = "RS256".into();
        assert!(config.validate().is_err());
    }
}
