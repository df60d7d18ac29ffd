//! Session PIN admission
//!
//! Destructive admin operations require a PIN verified recently in the same
//! session. The PIN is set once per session, stored as a salted Argon2 hash,
//! and verification attempts are counted with a cooldown lock.

use chrono::{Duration as ChronoDuration, Utc};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

use super::password::SecretHasher;
use super::session::AdminSession;

const PIN_MIN_LEN: usize = 4;
const PIN_MAX_LEN: usize = 32;

/// PINs that show up in every breach corpus
const PIN_BLACKLIST: &[&str] = &[
    "abc123", "a1b2c3", "admin1", "pass123", "password1", "qwerty1", "test123", "abcd1234",
];

/// PIN rules and attempt accounting
#[derive(Clone)]
pub struct PinPolicy {
    hasher: SecretHasher,
    max_attempts: u32,
    cooldown_secs: u64,
    max_age_secs: u64,
}

impl PinPolicy {
    /// Policy from the auth configuration
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            hasher: SecretHasher::new(PIN_MIN_LEN),
            max_attempts: config.pin_max_attempts,
            cooldown_secs: config.pin_cooldown_secs,
            max_age_secs: config.pin_max_age_secs,
        }
    }

    /// Set the session PIN; allowed exactly once per session
    ///
    /// Mutates the session in place; the caller persists it.
    pub fn set_pin(&self, session: &mut AdminSession, pin: &str) -> Result<()> {
        if session.pin_hash.is_some() {
            return Err(Error::BadRequest(
                "PIN is already set for this session".into(),
            ));
        }
        validate_pin_strength(pin)?;
        session.pin_hash = Some(self.hasher.hash(pin)?);
        session.pin_attempts = 0;
        session.pin_locked_until = None;
        Ok(())
    }

    /// Verify the session PIN; constant-time compare, attempt counting
    ///
    /// Success stamps `pin_verified_at`. After `max_attempts` failures the
    /// PIN locks for the cooldown and verification fails with `retry_after`.
    pub fn verify_pin(&self, session: &mut AdminSession, pin: &str) -> Result<()> {
        let now = Utc::now();
        if let Some(locked_until) = session.pin_locked_until {
            if locked_until > now {
                return Err(Error::RateLimited {
                    retry_after_secs: (locked_until - now).num_seconds().max(1) as u64,
                });
            }
            // Cooldown over; attempts start fresh
            session.pin_locked_until = None;
            session.pin_attempts = 0;
        }

        let Some(pin_hash) = session.pin_hash.clone() else {
            return Err(Error::BadRequest("No PIN set for this session".into()));
        };

        if self.hasher.verify(pin, &pin_hash)? {
            session.pin_attempts = 0;
            session.pin_verified_at = Some(now);
            return Ok(());
        }

        session.pin_attempts += 1;
        if session.pin_attempts >= self.max_attempts {
            session.pin_locked_until =
                Some(now + ChronoDuration::seconds(self.cooldown_secs as i64));
            tracing::warn!(
                session = %session.jti,
                attempts = session.pin_attempts,
                "PIN locked after repeated failures"
            );
            return Err(Error::RateLimited {
                retry_after_secs: self.cooldown_secs,
            });
        }
        Err(Error::unauthorized("pin_invalid", "PIN verification failed"))
    }

    /// Admission check for destructive operations
    pub fn require_pin(&self, session: &AdminSession) -> Result<()> {
        if session.pin_hash.is_none() {
            return Err(Error::Forbidden(
                "This operation requires a session PIN".into(),
            ));
        }
        if let Some(locked_until) = session.pin_locked_until {
            if locked_until > Utc::now() {
                return Err(Error::Forbidden("Session PIN is locked".into()));
            }
        }
        match session.pin_verified_at {
            Some(at) if Utc::now() - at <= ChronoDuration::seconds(self.max_age_secs as i64) => {
                Ok(())
            }
            _ => Err(Error::Forbidden(
                "PIN verification required for this operation".into(),
            )),
        }
    }
}

/// Strength rules: length bounds, letters and digits, no known-bad PINs
fn validate_pin_strength(pin: &str) -> Result<()> {
    if pin.len() < PIN_MIN_LEN || pin.len() > PIN_MAX_LEN {
        return Err(Error::BadRequest(format!(
            "PIN must be {PIN_MIN_LEN}..={PIN_MAX_LEN} characters"
        )));
    }
    if !pin.chars().any(|c| c.is_ascii_alphabetic())
        || !pin.chars().any(|c| c.is_ascii_digit())
    {
        return Err(Error::BadRequest(
            "PIN must contain both letters and digits".into(),
        ));
    }
    let lowered = pin.to_lowercase();
    if PIN_BLACKLIST.contains(&lowered.as_str()) {
        return Err(Error::BadRequest("PIN is too common".into()));
    }
    let mut chars = pin.chars();
    if let Some(first) = chars.next() {
        if chars.all(|c| c == first) {
            return Err(Error::BadRequest("PIN is too common".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session() -> AdminSession {
        AdminSession::new(
            "jti".into(),
            "admin".into(),
            "fp-hash".into(),
            Duration::from_secs(3600),
        )
    }

    fn policy() -> PinPolicy {
        PinPolicy::new(&AuthConfig {
            pin_max_attempts: 3,
            pin_cooldown_secs: 300,
            pin_max_age_secs: 900,
            ..Default::default()
        })
    }

    #[test]
    fn test_set_pin_once() {
        let policy = policy();
        let mut session = session();
        policy.set_pin(&mut session, "Abcd12").unwrap();
        assert!(session.pin_hash.is_some());
        // Second set is a 400 and does not mutate state
        let hash_before = session.pin_hash.clone();
        assert!(matches!(
            policy.set_pin(&mut session, "Wxyz34"),
            Err(Error::BadRequest(_))
        ));
        assert_eq!(session.pin_hash, hash_before);
    }

    #[test]
    fn test_strength_rules() {
        assert!(validate_pin_strength("ab1").is_err()); // too short
        assert!(validate_pin_strength("abcdef").is_err()); // no digit
        assert!(validate_pin_strength("123456").is_err()); // no letter
        assert!(validate_pin_strength("abc123").is_err()); // blacklisted
        assert!(validate_pin_strength("Abcd12").is_ok());
    }

    #[test]
    fn test_verify_then_require() {
        let policy = policy();
        let mut session = session();
        policy.set_pin(&mut session, "Abcd12").unwrap();

        // Unverified PIN does not admit
        assert!(policy.require_pin(&session).is_err());

        policy.verify_pin(&mut session, "Abcd12").unwrap();
        assert!(policy.require_pin(&session).is_ok());
    }

    #[test]
    fn test_wrong_pin_locks_after_attempts() {
        let policy = policy();
        let mut session = session();
        policy.set_pin(&mut session, "Abcd12").unwrap();

        for _ in 0..2 {
            let err = policy.verify_pin(&mut session, "nope99").unwrap_err();
            assert_eq!(err.code(), "pin_invalid");
        }
        let err = policy.verify_pin(&mut session, "nope99").unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        assert!(session.pin_locked_until.is_some());

        // Even the right PIN is rejected while locked
        assert!(matches!(
            policy.verify_pin(&mut session, "Abcd12"),
            Err(Error::RateLimited { .. })
        ));
        assert!(policy.require_pin(&session).is_err());
    }

    #[test]
    fn test_stale_verification_does_not_admit() {
        let policy = policy();
        let mut session = session();
        policy.set_pin(&mut session, "Abcd12").unwrap();
        policy.verify_pin(&mut session, "Abcd12").unwrap();
        session.pin_verified_at = Some(Utc::now() - ChronoDuration::seconds(901));
        assert!(policy.require_pin(&session).is_err());
    }

    #[test]
    fn test_require_without_pin_set() {
        let policy = policy();
        let session = session();
        assert!(matches!(
            policy.require_pin(&session),
            Err(Error::Forbidden(_))
        ));
    }
}
