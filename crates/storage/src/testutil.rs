//! Shared fixtures for tests of the stores and their callers.
//!
//! Feature-gated behind `testutil`. Enable it from `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! yeoladin-storage = { path = "../storage", features = ["testutil"] }
//! ```

use chrono::{Duration, Utc};

use crate::{
    auth::{
        BackendPrincipalStore, BackendSessionStore, NewPrincipal, Origin, Provider, RefreshSession,
    },
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    retry::CasRetryConfig,
    types::PrincipalId,
};

/// A placeholder PHC string accepted by the principal store as a local
/// password hash. It does not verify against any password.
pub const PLACEHOLDER_HASH: &str = "$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaGhhc2g";

/// Retry policy without sleeps, for tests that provoke conflicts.
#[must_use]
pub fn fast_cas_retry() -> CasRetryConfig {
    CasRetryConfig::builder().max_retries(64).base_delay(std::time::Duration::ZERO).build()
}

/// Creates principal and session stores sharing one [`MemoryBackend`].
#[must_use]
pub fn memory_stores()
-> (MemoryBackend, BackendPrincipalStore<MemoryBackend>, BackendSessionStore<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let principals =
        BackendPrincipalStore::new(backend.clone()).with_cas_retry_config(fast_cas_retry());
    let sessions =
        BackendSessionStore::new(backend.clone()).with_cas_retry_config(fast_cas_retry());
    (backend, principals, sessions)
}

/// A local principal with [`PLACEHOLDER_HASH`] as its password hash.
#[must_use]
pub fn new_local(email: &str, display_name: &str) -> NewPrincipal {
    NewPrincipal::builder()
        .email(email)
        .display_name(display_name)
        .origin(Origin::local(PLACEHOLDER_HASH))
        .build()
}

/// A federated principal.
#[must_use]
pub fn new_federated(email: &str, display_name: &str, provider: &str, subject: &str) -> NewPrincipal {
    NewPrincipal::builder()
        .email(email)
        .display_name(display_name)
        .origin(Origin::federated(Provider::new(provider), subject))
        .build()
}

/// A session issued now that expires after `ttl`.
///
/// A negative `ttl` produces an already expired session.
#[must_use]
pub fn session_for(principal_id: PrincipalId, token: &str, ttl: Duration) -> RefreshSession {
    let now = Utc::now();
    RefreshSession::new(principal_id, token, now, now + ttl)
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::AlreadyExists`].
#[macro_export]
macro_rules! assert_already_exists {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::AlreadyExists { .. })),
            "expected StorageError::AlreadyExists, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok` and return the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a transient failure.
pub fn is_transient<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(e) if e.is_transient())
}

/// Returns `true` if the result is a [`StorageError::Timeout`].
pub fn is_timeout<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Timeout { .. }))
}
