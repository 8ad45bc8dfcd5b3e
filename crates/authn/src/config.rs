//! Gateway configuration.
//!
//! [`AuthConfig`] is built either in code through its validating builder or
//! from a serialized document (durations in humantime form):
//!
//! ```
//! use std::time::Duration;
//! use yeoladin_authn::config::{AuthConfig, RefreshRotation};
//!
//! let config: AuthConfig = serde_json::from_str(&format!(
//!     r#"{{
//!         "signing_secret": "{}",
//!         "access_token_ttl": "15m",
//!         "refresh_token_ttl": "7days",
//!         "refresh_rotation": "reuse"
//!     }}"#,
//!     "k".repeat(64),
//! ))
//! .unwrap();
//!
//! assert_eq!(config.access_token_ttl(), Duration::from_secs(15 * 60));
//! assert_eq!(config.refresh_rotation(), RefreshRotation::Reuse);
//! assert_eq!(config.store_timeout(), Duration::from_secs(5));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{error::ConfigError, validation::validate_secret};

/// Default access token lifetime (1 hour).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Default refresh token lifetime (14 days).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a successful refresh does with the presented refresh token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshRotation {
    /// Issue a new refresh token and invalidate the presented one.
    #[default]
    Rotate,
    /// Keep the presented refresh token valid until it expires.
    Reuse,
}

/// Argon2id cost parameters for new password hashes.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordHashingConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_memory_kib")]
    #[builder(default = default_memory_kib())]
    pub memory_kib: u32,
    /// Number of passes.
    #[serde(default = "default_iterations")]
    #[builder(default = default_iterations())]
    pub iterations: u32,
    /// Degree of parallelism.
    #[serde(default = "default_parallelism")]
    #[builder(default = default_parallelism())]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    19 * 1024
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

impl Default for PasswordHashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

/// Validated gateway configuration.
///
/// # Validation
///
/// - `signing_secret` must be at least 64 bytes
/// - every duration must be non-zero
/// - `refresh_token_ttl` must exceed `access_token_ttl`
/// - `password_hashing` needs `iterations >= 1`, `parallelism >= 1` and
///   `memory_kib >= 8 * parallelism`
#[derive(Clone, Deserialize)]
#[serde(try_from = "AuthConfigDocument")]
pub struct AuthConfig {
    signing_secret: Zeroizing<String>,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    store_timeout: Duration,
    refresh_rotation: RefreshRotation,
    password_hashing: PasswordHashingConfig,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("store_timeout", &self.store_timeout)
            .field("refresh_rotation", &self.refresh_rotation)
            .field("password_hashing", &self.password_hashing)
            .finish()
    }
}

#[bon::bon]
impl AuthConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any rule listed on [`AuthConfig`] is broken.
    #[builder]
    pub fn new(
        #[builder(into)] signing_secret: Zeroizing<String>,
        #[builder(default = DEFAULT_ACCESS_TOKEN_TTL)] access_token_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_TTL)] refresh_token_ttl: Duration,
        #[builder(default = DEFAULT_STORE_TIMEOUT)] store_timeout: Duration,
        #[builder(default)] refresh_rotation: RefreshRotation,
        #[builder(default)] password_hashing: PasswordHashingConfig,
    ) -> Result<Self, ConfigError> {
        validate_secret(signing_secret.as_bytes())?;
        non_zero("access_token_ttl", access_token_ttl)?;
        non_zero("refresh_token_ttl", refresh_token_ttl)?;
        non_zero("store_timeout", store_timeout)?;

        if refresh_token_ttl <= access_token_ttl {
            return Err(ConfigError::Invalid {
                field: "refresh_token_ttl",
                reason: format!(
                    "must exceed access_token_ttl ({refresh_token_ttl:?} <= {access_token_ttl:?})"
                ),
            });
        }

        validate_hashing(&password_hashing)?;

        Ok(Self {
            signing_secret,
            access_token_ttl,
            refresh_token_ttl,
            store_timeout,
            refresh_rotation,
            password_hashing,
        })
    }

    /// Returns the raw signing secret.
    #[must_use]
    pub fn signing_secret(&self) -> &[u8] {
        self.signing_secret.as_bytes()
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Returns the bound on a single store call.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Returns the refresh rotation policy.
    #[must_use]
    pub fn refresh_rotation(&self) -> RefreshRotation {
        self.refresh_rotation
    }

    /// Returns the Argon2 parameters for new hashes.
    #[must_use]
    pub fn password_hashing(&self) -> &PasswordHashingConfig {
        &self.password_hashing
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::BelowMinimum { field, min: "1s".into(), value: "0s".into() });
    }
    Ok(())
}

fn validate_hashing(config: &PasswordHashingConfig) -> Result<(), ConfigError> {
    if config.iterations == 0 {
        return Err(ConfigError::BelowMinimum {
            field: "password_hashing.iterations",
            min: "1".into(),
            value: "0".into(),
        });
    }
    if config.parallelism == 0 {
        return Err(ConfigError::BelowMinimum {
            field: "password_hashing.parallelism",
            min: "1".into(),
            value: "0".into(),
        });
    }
    let min_memory = config.parallelism.saturating_mul(8);
    if config.memory_kib < min_memory {
        return Err(ConfigError::BelowMinimum {
            field: "password_hashing.memory_kib",
            min: min_memory.to_string(),
            value: config.memory_kib.to_string(),
        });
    }
    Ok(())
}

/// Serialized form of [`AuthConfig`], validated on conversion.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthConfigDocument {
    signing_secret: Zeroizing<String>,
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    access_token_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    refresh_token_ttl: Duration,
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    store_timeout: Duration,
    #[serde(default)]
    refresh_rotation: RefreshRotation,
    #[serde(default)]
    password_hashing: PasswordHashingConfig,
}

fn default_access_token_ttl() -> Duration {
    DEFAULT_ACCESS_TOKEN_TTL
}

fn default_refresh_token_ttl() -> Duration {
    DEFAULT_REFRESH_TOKEN_TTL
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

impl TryFrom<AuthConfigDocument> for AuthConfig {
    type Error = ConfigError;

    fn try_from(doc: AuthConfigDocument) -> Result<Self, Self::Error> {
        AuthConfig::builder()
            .signing_secret(doc.signing_secret)
            .access_token_ttl(doc.access_token_ttl)
            .refresh_token_ttl(doc.refresh_token_ttl)
            .store_timeout(doc.store_timeout)
            .refresh_rotation(doc.refresh_rotation)
            .password_hashing(doc.password_hashing)
            .build()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn secret() -> String {
        "s".repeat(64)
    }

    #[test]
    fn test_builder_defaults() {
        let config = AuthConfig::builder().signing_secret(secret()).build().unwrap();

        assert_eq!(config.access_token_ttl(), DEFAULT_ACCESS_TOKEN_TTL);
        assert_eq!(config.refresh_token_ttl(), DEFAULT_REFRESH_TOKEN_TTL);
        assert_eq!(config.store_timeout(), DEFAULT_STORE_TIMEOUT);
        assert_eq!(config.refresh_rotation(), RefreshRotation::Rotate);
        assert_eq!(config.password_hashing(), &PasswordHashingConfig::default());
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = AuthConfig::builder().signing_secret("s".repeat(63)).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "signing_secret", .. }));
    }

    #[rstest]
    #[case::zero_access(Duration::ZERO, DEFAULT_REFRESH_TOKEN_TTL, DEFAULT_STORE_TIMEOUT, "access_token_ttl")]
    #[case::zero_refresh(DEFAULT_ACCESS_TOKEN_TTL, Duration::ZERO, DEFAULT_STORE_TIMEOUT, "refresh_token_ttl")]
    #[case::zero_timeout(DEFAULT_ACCESS_TOKEN_TTL, DEFAULT_REFRESH_TOKEN_TTL, Duration::ZERO, "store_timeout")]
    fn test_zero_durations_rejected(
        #[case] access: Duration,
        #[case] refresh: Duration,
        #[case] timeout: Duration,
        #[case] expected_field: &str,
    ) {
        let err = AuthConfig::builder()
            .signing_secret(secret())
            .access_token_ttl(access)
            .refresh_token_ttl(refresh)
            .store_timeout(timeout)
            .build()
            .unwrap_err();

        match err {
            ConfigError::BelowMinimum { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected BelowMinimum, got {other:?}"),
        }
    }

    #[rstest]
    #[case::equal(3600, 3600)]
    #[case::shorter(3600, 60)]
    fn test_refresh_must_outlive_access(#[case] access_secs: u64, #[case] refresh_secs: u64) {
        let err = AuthConfig::builder()
            .signing_secret(secret())
            .access_token_ttl(Duration::from_secs(access_secs))
            .refresh_token_ttl(Duration::from_secs(refresh_secs))
            .build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { field: "refresh_token_ttl", .. }));
    }

    #[rstest]
    #[case::no_iterations(19456, 0, 1, "password_hashing.iterations")]
    #[case::no_parallelism(19456, 2, 0, "password_hashing.parallelism")]
    #[case::too_little_memory(15, 2, 2, "password_hashing.memory_kib")]
    fn test_hashing_params_validated(
        #[case] memory_kib: u32,
        #[case] iterations: u32,
        #[case] parallelism: u32,
        #[case] expected_field: &str,
    ) {
        let err = AuthConfig::builder()
            .signing_secret(secret())
            .password_hashing(PasswordHashingConfig { memory_kib, iterations, parallelism })
            .build()
            .unwrap_err();

        match err {
            ConfigError::BelowMinimum { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected BelowMinimum, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_applies_defaults_and_validates() {
        let json = format!(r#"{{"signing_secret": "{}"}}"#, secret());
        let config: AuthConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.refresh_token_ttl(), DEFAULT_REFRESH_TOKEN_TTL);

        let invalid = format!(
            r#"{{"signing_secret": "{}", "access_token_ttl": "2h", "refresh_token_ttl": "1h"}}"#,
            secret()
        );
        let err = serde_json::from_str::<AuthConfig>(&invalid).unwrap_err();
        assert!(err.to_string().contains("refresh_token_ttl"));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = format!(r#"{{"signing_secret": "{}", "bcrypt_cost": 10}}"#, secret());
        assert!(serde_json::from_str::<AuthConfig>(&json).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AuthConfig::builder().signing_secret(secret()).build().unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&secret()));
    }
}
