//! Secret hashing using Argon2id
//!
//! One hasher covers admin passwords and session PINs; both are stored only
//! as salted PHC-format hashes and verified in constant time.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as Argon2Hasher, PasswordVerifier,
        SaltString,
    },
    Argon2,
};

use crate::error::{Error, Result};

/// Argon2id hasher with a minimum input length
#[derive(Clone)]
pub struct SecretHasher {
    min_length: usize,
}

impl SecretHasher {
    /// Hasher rejecting inputs shorter than `min_length`
    #[must_use]
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// Hash a secret into PHC string format
    pub fn hash(&self, secret: &str) -> Result<String> {
        if secret.len() < self.min_length {
            return Err(Error::Validation(format!(
                "Secret must be at least {} characters",
                self.min_length
            )));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("Failed to hash secret: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify a secret against a PHC hash; constant-time
    pub fn verify(&self, secret: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| Error::Internal(format!("Invalid secret hash format: {e}")))?;
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Internal(format!("Secret verification failed: {e}"))),
        }
    }
}

/// Whether a string is already a PHC-format Argon2 hash
#[must_use]
pub fn is_phc_hash(value: &str) -> bool {
    value.starts_with("$argon2")
}
