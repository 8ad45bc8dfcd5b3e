//! Algorithm and key policy for the credential signer.
//!
//! Tokens are signed and verified with one shared HS512 key, so the only
//! acceptable header algorithm is `HS512`. Everything else is rejected before
//! the signature is examined, which closes off algorithm substitution
//! (`none`, downgrades to weaker HMACs, and key-confusion with asymmetric
//! algorithms).

use crate::error::{ConfigError, TokenError};

/// Algorithms rejected outright, whatever the key.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`: weaker HMAC variants of the accepted algorithm
/// - asymmetric algorithms: the shared secret must never be interpreted as a public key
pub const FORBIDDEN_ALGORITHMS: &[&str] = &[
    "none", "HS256", "HS384", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256",
    "ES384", "EdDSA",
];

/// Accepted JWT algorithms.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["HS512"];

/// Minimum signing secret length in bytes, matching the HS512 block size.
pub const MIN_SECRET_LEN: usize = 64;

/// Validates a JWT header algorithm against the signer policy.
///
/// # Errors
///
/// Returns [`TokenError::UnsupportedAlgorithm`] if `alg` is forbidden or not
/// in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use yeoladin_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("HS512").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), TokenError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(TokenError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(TokenError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only HS512 is supported)"
        )));
    }

    Ok(())
}

/// Validates the length of a signing secret.
///
/// # Errors
///
/// Returns [`ConfigError::BelowMinimum`] if `secret` is shorter than
/// [`MIN_SECRET_LEN`] bytes.
pub fn validate_secret(secret: &[u8]) -> Result<(), ConfigError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::BelowMinimum {
            field: "signing_secret",
            min: format!("{MIN_SECRET_LEN} bytes"),
            value: format!("{} bytes", secret.len()),
        });
    }
    Ok(())
}
