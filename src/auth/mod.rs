//! Authentication and session core
//!
//! Token minting/validation, admin sessions with PIN admission, single-use
//! registration tokens, the login attempt ledger, and request rate limiting.
//! Every security-relevant failure is logged with source, principal, and
//! outcome, and recorded in the ledger where it applies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;

pub mod ledger;
pub mod password;
pub mod pin;
pub mod rate_limit;
pub mod session;
pub mod temp_token;
pub mod tokens;

pub use ledger::{AttemptStatus, LoginAttemptLedger};
pub use password::SecretHasher;
pub use pin::PinPolicy;
pub use rate_limit::RateLimiter;
pub use session::{AdminSession, SessionStore};
pub use temp_token::{TempTokenGrant, TempTokenService};
pub use tokens::{fingerprint_hash, fingerprint_matches, Claims, Role, TokenService};

/// Successful login response
#[derive(Debug, Clone, Serialize)]
pub struct LoginGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Session introspection for `GET /auth/session_status`
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub valid: bool,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub pin_set: bool,
    pub pin_verified: bool,
}

/// PIN introspection for `GET /auth/pin_status`
#[derive(Debug, Clone, Serialize)]
pub struct PinStatus {
    pub pin_set: bool,
    pub pin_verified: bool,
    pub pin_locked: bool,
}

/// The authentication service
#[derive(Clone)]
pub struct AuthService {
    tokens: TokenService,
    sessions: SessionStore,
    temp_tokens: TempTokenService,
    ledger: LoginAttemptLedger,
    limiter: RateLimiter,
    pin: PinPolicy,
    admin_username: String,
    admin_password_hash: Option<String>,
    agent_keys: Vec<String>,
    allowed_agent_types: Vec<String>,
    scrape_token: Option<String>,
}

impl AuthService {
    /// Wire the auth core from configuration
    ///
    /// A plaintext admin password is hashed once here; a PHC-format value is
    /// taken as-is.
    pub fn new(config: &Config, storage: Storage) -> Result<Self> {
        let tokens = TokenService::new(&config.auth, storage.clone())?;
        let sessions = SessionStore::new(
            storage.clone(),
            std::time::Duration::from_secs(config.auth.session_timeout_minutes * 60),
            config.auth.max_sessions,
        );
        let temp_tokens = TempTokenService::new(
            storage.clone(),
            tokens.clone(),
            config.auth.temp_token_ttl(),
        );
        let ledger = LoginAttemptLedger::new(storage.clone(), config.rate_limit.clone());
        let limiter = RateLimiter::new(storage, config.rate_limit.clone());

        let admin_password_hash = if config.auth.admin_password.is_empty() {
            None
        } else if password::is_phc_hash(&config.auth.admin_password) {
            Some(config.auth.admin_password.clone())
        } else {
            Some(SecretHasher::new(1).hash(&config.auth.admin_password)?)
        };

        Ok(Self {
            tokens,
            sessions,
            temp_tokens,
            ledger,
            limiter,
            pin: PinPolicy::new(&config.auth),
            admin_username: config.auth.admin_username.clone(),
            admin_password_hash,
            agent_keys: config.auth.agent_keys.clone(),
            allowed_agent_types: config.registry.allowed_agent_types.clone(),
            scrape_token: config.auth.metrics_scrape_token.clone(),
        })
    }

    /// The token service, for callers that only need validation
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// The request rate limiter
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // ------------------------------------------------------------------
    // Admin login / logout
    // ------------------------------------------------------------------

    /// Authenticate the admin and mint a fingerprint-bound token
    pub async fn admin_login(
        &self,
        username: &str,
        password: &str,
        fingerprint: &str,
        source_ip: &str,
    ) -> Result<LoginGrant> {
        let principal = format!("login:{username}");
        let source = format!("ip:{source_ip}");

        for key in [&principal, &source] {
            let status = self.ledger.check(key).await?;
            if !status.allowed() {
                tracing::warn!(
                    source_ip = %source_ip,
                    principal = %username,
                    outcome = "rate_limited",
                    retry_after = status.retry_after_secs,
                    "Login attempt rejected by ledger"
                );
                return Err(Error::RateLimited {
                    retry_after_secs: status.retry_after_secs,
                });
            }
        }

        let credentials_ok = self.verify_admin_credentials(username, password)?;
        if !credentials_ok {
            let status = self.ledger.record_failure(&principal).await?;
            self.ledger.record_failure(&source).await?;
            tracing::warn!(
                source_ip = %source_ip,
                principal = %username,
                outcome = "invalid_credentials",
                failures = status.failures,
                next_delay = status.retry_after_secs,
                "Login failed"
            );
            return Err(Error::unauthorized(
                "invalid_credentials",
                format!(
                    "Invalid credentials; next attempt allowed in {}s",
                    status.retry_after_secs
                ),
            ));
        }

        self.ledger.record_success(&principal).await?;
        self.ledger.record_success(&source).await?;

        let (token, claims) = self
            .tokens
            .mint(username, Role::Admin, fingerprint, None, None)?;
        self.sessions
            .create(
                claims.jti.clone(),
                username.to_string(),
                claims.fingerprint_hash.clone(),
            )
            .await?;

        tracing::info!(
            source_ip = %source_ip,
            principal = %username,
            outcome = "success",
            "Admin logged in"
        );
        Ok(LoginGrant {
            access_token: token,
            token_type: "bearer",
            expires_at: DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        })
    }

    /// Revoke the admin token and destroy its session (PIN state included)
    pub async fn logout(&self, claims: &Claims) -> Result<()> {
        self.tokens.revoke(claims).await?;
        self.sessions.delete(&claims.jti).await?;
        tracing::info!(principal = %claims.sub, "Admin logged out");
        Ok(())
    }

    /// Validate any bearer token against the presented fingerprint
    pub async fn validate(&self, token: &str, fingerprint: &str) -> Result<Claims> {
        self.tokens.validate(token, fingerprint).await
    }

    /// Require an admin principal with a live session
    pub async fn authorize_admin(&self, claims: &Claims) -> Result<AdminSession> {
        if claims.role != Role::Admin {
            return Err(Error::Forbidden("Admin role required".into()));
        }
        self.sessions.get(&claims.jti).await
    }

    /// Require an agent principal bound to `agent_id` (admins also pass)
    pub fn authorize_agent(&self, claims: &Claims, agent_id: &str) -> Result<()> {
        match claims.role {
            Role::Admin => Ok(()),
            Role::Agent if claims.agent_id.as_deref() == Some(agent_id) => Ok(()),
            Role::Agent => Err(Error::Forbidden(
                "Token is bound to a different agent".into(),
            )),
            _ => Err(Error::Forbidden("Agent role required".into())),
        }
    }

    /// Introspect the current session
    pub async fn session_status(&self, claims: &Claims) -> Result<SessionStatus> {
        let session = self.authorize_admin(claims).await?;
        Ok(SessionStatus {
            valid: true,
            user_id: session.user_id,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            pin_set: session.pin_hash.is_some(),
            pin_verified: session.pin_verified_at.is_some(),
        })
    }

    // ------------------------------------------------------------------
    // PIN admission
    // ------------------------------------------------------------------

    /// Set the session PIN (once per session)
    pub async fn set_pin(&self, claims: &Claims, pin: &str) -> Result<()> {
        self.limiter.acquire(&format!("pin:{}", claims.jti)).await?;
        let mut session = self.authorize_admin(claims).await?;
        self.pin.set_pin(&mut session, pin)?;
        self.sessions.save(&session).await
    }

    /// Verify the session PIN; failed attempts persist with the session
    pub async fn verify_pin(&self, claims: &Claims, pin: &str) -> Result<()> {
        let mut session = self.authorize_admin(claims).await?;
        let outcome = self.pin.verify_pin(&mut session, pin);
        self.sessions.save(&session).await?;
        if let Err(e) = &outcome {
            tracing::warn!(
                principal = %claims.sub,
                outcome = %e.code(),
                attempts = session.pin_attempts,
                "PIN verification failed"
            );
        }
        outcome
    }

    /// PIN state for the current session
    pub async fn pin_status(&self, claims: &Claims) -> Result<PinStatus> {
        let session = self.authorize_admin(claims).await?;
        Ok(PinStatus {
            pin_set: session.pin_hash.is_some(),
            pin_verified: session.pin_verified_at.is_some(),
            pin_locked: session
                .pin_locked_until
                .map(|until| until > Utc::now())
                .unwrap_or(false),
        })
    }

    /// Admission predicate for destructive admin operations
    pub async fn require_pin(&self, claims: &Claims) -> Result<()> {
        let session = self.authorize_admin(claims).await?;
        self.pin.require_pin(&session)
    }

    // ------------------------------------------------------------------
    // Agent registration tokens
    // ------------------------------------------------------------------

    /// Mint a single-use temp token after checking the registration key
    pub async fn request_temp_token(
        &self,
        agent_id: &str,
        agent_type: &str,
        agent_key: &str,
        fingerprint: &str,
        source_ip: &str,
    ) -> Result<(String, DateTime<Utc>)> {
        self.limiter
            .acquire(&format!("temp:{source_ip}:{agent_id}"))
            .await?;

        if !self.agent_key_matches(agent_key) {
            tracing::warn!(
                source_ip = %source_ip,
                principal = %agent_id,
                outcome = "invalid_agent_key",
                "Temp token request rejected"
            );
            return Err(Error::unauthorized(
                "invalid_agent_key",
                "Unknown registration key",
            ));
        }
        if !self.allowed_agent_types.iter().any(|t| t == agent_type) {
            return Err(Error::TypeNotAllowed(agent_type.to_string()));
        }

        self.temp_tokens.issue(agent_id, agent_type, fingerprint).await
    }

    /// Validate and spend a temp token; returns the registrant facts
    pub async fn consume_temp_token(
        &self,
        token: &str,
        fingerprint: &str,
    ) -> Result<TempTokenGrant> {
        let claims = self.tokens.validate(token, fingerprint).await?;
        self.temp_tokens.consume(&claims).await
    }

    /// Mint the long-lived agent token returned by registration
    pub fn mint_agent_token(
        &self,
        agent_id: &str,
        fingerprint: &str,
    ) -> Result<(String, Claims)> {
        self.tokens
            .mint(agent_id, Role::Agent, fingerprint, Some(agent_id), None)
    }

    // ------------------------------------------------------------------
    // Scrape access
    // ------------------------------------------------------------------

    /// Check the static bearer token of the metrics scrape endpoint
    pub fn verify_scrape(&self, bearer: &str) -> Result<()> {
        let Some(expected) = &self.scrape_token else {
            return Err(Error::Forbidden("Metrics scraping is not enabled".into()));
        };
        if constant_time_eq(bearer, expected) {
            Ok(())
        } else {
            Err(Error::unauthorized("token_invalid", "Invalid scrape token"))
        }
    }

    fn verify_admin_credentials(&self, username: &str, password: &str) -> Result<bool> {
        let Some(password_hash) = &self.admin_password_hash else {
            return Ok(false);
        };
        // Evaluate both factors unconditionally; no early exit on username.
        let username_ok = constant_time_eq(username, &self.admin_username);
        let password_ok = SecretHasher::new(1).verify(password, password_hash)?;
        Ok(username_ok && password_ok)
    }

    fn agent_key_matches(&self, presented: &str) -> bool {
        let mut matched = false;
        for key in &self.agent_keys {
            matched |= constant_time_eq(presented, key);
        }
        matched
    }
}

/// Constant-time string comparison via fixed-width BLAKE3 digests
fn constant_time_eq(a: &str, b: &str) -> bool {
    blake3::hash(a.as_bytes()) == blake3::hash(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".into();
        config.auth.admin_username = "admin".into();
        config.auth.admin_password = "hunter2hunter2".into();
        config.auth.agent_keys = vec!["test-agent-001".into()];
        config.registry.allowed_agent_types = vec!["testing".into()];
        config.auth.metrics_scrape_token = Some("scrape-secret".into());
        config.rate_limit.lockout_threshold = 3;
        config
    }

    fn auth() -> AuthService {
        AuthService::new(&config(), Storage::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_login_success_creates_session() {
        let auth = auth();
        let grant = auth
            .admin_login("admin", "hunter2hunter2", "fp-a", "127.0.0.1")
            .await
            .unwrap();
        let claims = auth.validate(&grant.access_token, "fp-a").await.unwrap();
        assert_eq!(claims.role, Role::Admin);
        let session = auth.authorize_admin(&claims).await.unwrap();
        assert_eq!(session.user_id, "admin");
    }

    #[tokio::test]
    async fn test_login_failure_then_backoff() {
        let auth = auth();
        let err = auth
            .admin_login("admin", "wrong", "fp", "10.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_credentials");

        // The ledger now imposes a delay before the next attempt
        let err = auth
            .admin_login("admin", "hunter2hunter2", "fp", "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_destroys_session() {
        let auth = auth();
        let grant = auth
            .admin_login("admin", "hunter2hunter2", "fp", "127.0.0.1")
            .await
            .unwrap();
        let claims = auth.validate(&grant.access_token, "fp").await.unwrap();
        auth.logout(&claims).await.unwrap();

        let err = auth.validate(&grant.access_token, "fp").await.unwrap_err();
        assert_eq!(err.code(), "token_revoked");
    }

    #[tokio::test]
    async fn test_pin_flow_gates_destructive_ops() {
        let auth = auth();
        let grant = auth
            .admin_login("admin", "hunter2hunter2", "fp", "127.0.0.1")
            .await
            .unwrap();
        let claims = auth.validate(&grant.access_token, "fp").await.unwrap();

        // Without a verified PIN admission fails
        assert!(auth.require_pin(&claims).await.is_err());

        auth.set_pin(&claims, "Abcd12").await.unwrap();
        assert!(auth.require_pin(&claims).await.is_err());

        auth.verify_pin(&claims, "Abcd12").await.unwrap();
        auth.require_pin(&claims).await.unwrap();

        // set_pin is once per session
        let err = auth.set_pin(&claims, "Wxyz34").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_pin_attempts_persist_across_calls() {
        let auth = auth();
        let grant = auth
            .admin_login("admin", "hunter2hunter2", "fp", "127.0.0.1")
            .await
            .unwrap();
        let claims = auth.validate(&grant.access_token, "fp").await.unwrap();
        auth.set_pin(&claims, "Abcd12").await.unwrap();

        for _ in 0..4 {
            let _ = auth.verify_pin(&claims, "wrong1").await;
        }
        let err = auth.verify_pin(&claims, "wrong1").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        let status = auth.pin_status(&claims).await.unwrap();
        assert!(status.pin_locked);
    }

    #[tokio::test]
    async fn test_temp_token_flow() {
        let auth = auth();
        let (token, _expires) = auth
            .request_temp_token("echo-1", "testing", "test-agent-001", "fp-abc", "127.0.0.1")
            .await
            .unwrap();
        let grant = auth.consume_temp_token(&token, "fp-abc").await.unwrap();
        assert_eq!(grant.agent_id, "echo-1");

        // Single use
        let err = auth.consume_temp_token(&token, "fp-abc").await.unwrap_err();
        assert_eq!(err.code(), "token_already_used");
    }

    #[tokio::test]
    async fn test_temp_token_rejects_bad_key_and_type() {
        let auth = auth();
        let err = auth
            .request_temp_token("a", "testing", "bad-key", "fp", "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_agent_key");

        let err = auth
            .request_temp_token("a", "rogue", "test-agent-001", "fp", "127.0.0.1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "type_not_allowed");
    }

    #[tokio::test]
    async fn test_agent_authorization() {
        let auth = auth();
        let (token, _) = auth.mint_agent_token("echo-1", "fp").unwrap();
        let claims = auth.validate(&token, "fp").await.unwrap();
        assert!(auth.authorize_agent(&claims, "echo-1").is_ok());
        assert!(auth.authorize_agent(&claims, "other").is_err());
    }

    #[tokio::test]
    async fn test_scrape_token() {
        let auth = auth();
        assert!(auth.verify_scrape("scrape-secret").is_ok());
        assert!(auth.verify_scrape("nope").is_err());
    }
}
