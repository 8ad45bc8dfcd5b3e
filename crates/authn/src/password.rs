//! Argon2id hashing for local account secrets.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};

use crate::{
    config::PasswordHashingConfig,
    error::{AuthError, ConfigError},
};

const SALT_LEN: usize = 16;

/// Hashes and verifies secrets as PHC strings.
///
/// Verification reads its parameters from the stored hash, so hashes made
/// under older settings keep verifying after the settings change.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher").field("params", self.argon2.params()).finish_non_exhaustive()
    }
}

impl SecretHasher {
    /// Creates a hasher with the given cost parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if Argon2 rejects the parameters.
    pub fn new(config: &PasswordHashingConfig) -> Result<Self, ConfigError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| ConfigError::Invalid {
                field: "password_hashing",
                reason: e.to_string(),
            })?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut hasher = Self { argon2, dummy_hash: String::new() };
        hasher.dummy_hash = hasher.hash("dummy secret for absent principals").map_err(|e| {
            ConfigError::Invalid { field: "password_hashing", reason: e.to_string() }
        })?;
        Ok(hasher)
    }

    /// Hashes `secret` under a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if the OS random source or Argon2 fails.
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|e| AuthError::internal(format!("salt generation failed: {e}")))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::internal(format!("salt encoding failed: {e}")))?;

        let phc = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))?;
        Ok(phc.to_string())
    }

    /// Returns `true` if `secret` matches the PHC string `hash`.
    ///
    /// An unparsable hash never matches.
    #[must_use]
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// Spends the same work as a real verification, against a hash nobody
    /// owns. Used when there is no local principal to check against.
    pub fn verify_dummy(&self, secret: &str) {
        let _ = self.verify(secret, &self.dummy_hash);
    }
}
