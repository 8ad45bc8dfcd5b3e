//! Shared fixtures for gateway tests.
//!
//! Feature-gated behind `testutil`. Enable it from `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! yeoladin-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use yeoladin_storage::{
    MemoryBackend,
    auth::{PrincipalProfile, PrincipalStore, SessionStore},
    testutil::memory_stores,
};

use crate::{
    config::{AuthConfig, PasswordHashingConfig, RefreshRotation},
    error::Result,
    gateway::{AuthGateway, IssuedSession, LoginRequest, RegistrationRequest},
};

/// A 64-byte signing secret.
pub const TEST_SIGNING_SECRET: &str =
    "test-signing-secret-0123456789abcdef-0123456789abcdef-0123456789";

/// Argon2 parameters cheap enough for tests.
#[must_use]
pub fn cheap_hashing() -> PasswordHashingConfig {
    PasswordHashingConfig::builder().memory_kib(8).iterations(1).parallelism(1).build()
}

/// A configuration with [`TEST_SIGNING_SECRET`] and [`cheap_hashing`].
///
/// # Panics
///
/// Panics if the configuration is rejected.
#[must_use]
pub fn test_config(rotation: RefreshRotation) -> AuthConfig {
    AuthConfig::builder()
        .signing_secret(TEST_SIGNING_SECRET.to_owned())
        .refresh_rotation(rotation)
        .password_hashing(cheap_hashing())
        .build()
        .expect("test config is valid")
}

/// A gateway over in-memory stores, with handles on those stores.
#[derive(Clone)]
pub struct TestHarness {
    /// The gateway under test.
    pub gateway: AuthGateway,
    /// The principal store the gateway writes to.
    pub principals: Arc<dyn PrincipalStore>,
    /// The session store the gateway writes to.
    pub sessions: Arc<dyn SessionStore>,
    /// The backend both stores share.
    pub backend: MemoryBackend,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// A harness with refresh token rotation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config(RefreshRotation::Rotate))
    }

    /// A harness with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the gateway rejects the configuration.
    #[must_use]
    pub fn with_config(config: AuthConfig) -> Self {
        let (backend, principals, sessions) = memory_stores();
        let principals: Arc<dyn PrincipalStore> = Arc::new(principals);
        let sessions: Arc<dyn SessionStore> = Arc::new(sessions);
        let gateway = AuthGateway::new(config, Arc::clone(&principals), Arc::clone(&sessions))
            .expect("gateway accepts test config");
        Self { gateway, principals, sessions, backend }
    }

    /// Registers a local principal.
    ///
    /// # Panics
    ///
    /// Panics if registration fails.
    pub async fn register(&self, email: &str, secret: &str) -> PrincipalProfile {
        self.gateway
            .register(RegistrationRequest::builder().email(email).secret(secret.to_owned()).build())
            .await
            .expect("registration succeeds")
    }

    /// Logs in with local credentials.
    pub async fn login(&self, email: &str, secret: &str) -> Result<IssuedSession> {
        self.gateway
            .login(LoginRequest::builder().identifier(email).secret(secret.to_owned()).build())
            .await
    }
}

/// A gateway over the given stores.
///
/// # Panics
///
/// Panics if the gateway rejects the configuration.
#[must_use]
pub fn gateway_over(
    principals: Arc<dyn PrincipalStore>,
    sessions: Arc<dyn SessionStore>,
    store_timeout: Duration,
) -> AuthGateway {
    let config = AuthConfig::builder()
        .signing_secret(TEST_SIGNING_SECRET.to_owned())
        .store_timeout(store_timeout)
        .password_hashing(cheap_hashing())
        .build()
        .expect("test config is valid");
    AuthGateway::new(config, principals, sessions).expect("gateway accepts test config")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The result is `{header_b64}.{payload_b64}.` with an empty signature, for
/// exercising rejection of unsigned or algorithm-confused tokens.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Asserts that a [`Result<T, AuthError>`](crate::error::AuthError) is an
/// `Err` of the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use yeoladin_authn::assert_auth_error;
/// use yeoladin_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::InvalidCredentials);
/// assert_auth_error!(result, InvalidCredentials);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
