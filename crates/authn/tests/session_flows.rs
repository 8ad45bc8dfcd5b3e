//! End-to-end gateway flows over the in-memory stores.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use yeoladin_authn::{
    AuthError, FederatedAssertion, RefreshRotation, assert_auth_error,
    testutil::{TestHarness, gateway_over, test_config},
};
use yeoladin_storage::{
    PrincipalId, StorageResult,
    auth::{
        NewPrincipal, Principal, PrincipalStore, Provider, SESSION_PREFIX, SessionStore,
    },
    testutil::{memory_stores, session_for},
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn google(email: &str, subject: &str, name: &str) -> FederatedAssertion {
    FederatedAssertion::builder()
        .provider("google")
        .provider_subject_id(subject)
        .email(email.to_owned())
        .display_name(name.to_owned())
        .build()
}

/// A principal store whose calls never complete.
struct StalledPrincipalStore;

#[async_trait]
impl PrincipalStore for StalledPrincipalStore {
    async fn find_by_id(&self, _id: PrincipalId) -> StorageResult<Option<Principal>> {
        std::future::pending().await
    }

    async fn find_by_email(&self, _email: &str) -> StorageResult<Option<Principal>> {
        std::future::pending().await
    }

    async fn find_by_provider_subject(
        &self,
        _provider: &Provider,
        _subject_id: &str,
    ) -> StorageResult<Option<Principal>> {
        std::future::pending().await
    }

    async fn create(&self, _new: NewPrincipal) -> StorageResult<Principal> {
        std::future::pending().await
    }

    async fn update(&self, _principal: &Principal) -> StorageResult<()> {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Local login and refresh rotation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rotation_retires_presented_token_for_good() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;
    let session = harness.login("alice@example.com", "pw").await.expect("login");
    let r1 = session.refresh_token;

    let rotated = harness.gateway.refresh(Some(&r1)).await.expect("first refresh");
    let r2 = rotated.refresh_token.expect("rotation issues a new refresh token");
    assert_ne!(r1, r2);
    let claims = harness.gateway.authenticate(&rotated.access_token).expect("access token");
    assert_eq!(claims.subject, "alice@example.com");

    // R1 stays dead, and presenting it does not disturb R2
    for _ in 0..3 {
        assert_auth_error!(harness.gateway.refresh(Some(&r1)).await, InvalidRefreshToken);
    }
    let again = harness.gateway.refresh(Some(&r2)).await.expect("R2 still valid");
    assert!(again.refresh_token.is_some());
}

#[tokio::test]
async fn test_second_login_supersedes_first_session() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;

    let first = harness.login("alice@example.com", "pw").await.expect("login");
    let second = harness.login("alice@example.com", "pw").await.expect("login");

    assert_auth_error!(harness.gateway.refresh(Some(&first.refresh_token)).await, InvalidRefreshToken);
    assert!(harness.gateway.refresh(Some(&second.refresh_token)).await.is_ok());
    assert_eq!(harness.backend.keys_with_prefix(b"sessions/principal/").len(), 1);
}

#[tokio::test]
async fn test_wrong_secret_and_unknown_email_look_the_same() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;

    let wrong_secret = harness.login("alice@example.com", "nope").await.unwrap_err();
    let unknown = harness.login("nobody@example.com", "pw").await.unwrap_err();

    assert!(matches!(wrong_secret, AuthError::InvalidCredentials));
    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert_eq!(wrong_secret.to_string(), unknown.to_string());
}

#[tokio::test]
async fn test_reuse_mode_keeps_refresh_token() {
    let harness = TestHarness::with_config(test_config(RefreshRotation::Reuse));
    harness.register("alice@example.com", "pw").await;
    let session = harness.login("alice@example.com", "pw").await.expect("login");

    for _ in 0..3 {
        let tokens = harness.gateway.refresh(Some(&session.refresh_token)).await.expect("refresh");
        assert!(tokens.refresh_token.is_none());
        assert!(harness.gateway.authenticate(&tokens.access_token).is_ok());
    }
}

#[tokio::test]
async fn test_expired_session_is_purged_on_refresh() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;
    let session = harness.login("alice@example.com", "pw").await.expect("login");
    let id = session.principal.id;

    // The token itself is still within its lifetime; only the row has lapsed
    harness
        .sessions
        .put(session_for(id, &session.refresh_token, chrono::Duration::seconds(-1)))
        .await
        .expect("put expired session");

    assert_auth_error!(
        harness.gateway.refresh(Some(&session.refresh_token)).await,
        InvalidRefreshToken
    );
    assert!(harness.sessions.find_by_principal(id).await.expect("store").is_none());
    assert!(harness.backend.keys_with_prefix(SESSION_PREFIX.as_bytes()).is_empty());
}

#[tokio::test]
async fn test_logout_ends_session() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;
    let session = harness.login("alice@example.com", "pw").await.expect("login");

    harness.gateway.logout(Some(&session.refresh_token)).await.expect("logout");
    harness.gateway.logout(Some(&session.refresh_token)).await.expect("logout is idempotent");

    assert_auth_error!(harness.gateway.refresh(Some(&session.refresh_token)).await, InvalidRefreshToken);
    // Access tokens live until they expire
    assert!(harness.gateway.authenticate(&session.access_token).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_single_winner() {
    let harness = TestHarness::new();
    harness.register("alice@example.com", "pw").await;
    let session = harness.login("alice@example.com", "pw").await.expect("login");

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let gateway = harness.gateway.clone();
        let token = session.refresh_token.clone();
        tasks.spawn(async move { gateway.refresh(Some(&token)).await });
    }

    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result.expect("task panicked") {
            Ok(tokens) => winners.push(tokens.refresh_token.expect("rotated")),
            Err(AuthError::InvalidRefreshToken) => {},
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one refresh may succeed");
    assert!(harness.gateway.refresh(Some(&winners[0])).await.is_ok());
}

// ---------------------------------------------------------------------------
// Federated login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_federated_login_is_stable_across_logins() {
    let harness = TestHarness::new();

    let first = harness.gateway.federated_login(google("bob@example.com", "g-123", "Bob")).await.expect("login");
    let second =
        harness.gateway.federated_login(google("bob@example.com", "g-123", "Bob")).await.expect("login");

    assert_eq!(first.principal.id, second.principal.id);
    assert_eq!(second.principal.origin, "GOOGLE");
    assert_eq!(second.principal.display_name, "Bob");
    let claims = harness.gateway.authenticate(&second.access_token).expect("access token");
    assert_eq!(claims.subject, "bob@example.com");
    assert_eq!(claims.authorities, vec!["ROLE_USER"]);
}

#[tokio::test]
async fn test_federated_login_relinks_local_account() {
    let harness = TestHarness::new();
    let local = harness.register("carol@example.com", "pw").await;

    let session =
        harness.gateway.federated_login(google("carol@example.com", "g-9", "Carol")).await.expect("login");

    assert_eq!(session.principal.id, local.id);
    assert_eq!(session.principal.origin, "GOOGLE");
    let stored = harness.principals.find_by_email("carol@example.com").await.expect("store").expect("principal");
    assert_eq!(stored.origin.label(), "GOOGLE");

    // The local secret no longer works after the re-link
    assert_auth_error!(harness.login("carol@example.com", "pw").await, InvalidCredentials);
}

#[tokio::test]
async fn test_federated_login_onto_held_identity_leaves_local_account_alone() {
    let harness = TestHarness::new();
    let carol = harness.register("carol@example.com", "pw").await;
    harness.gateway.federated_login(google("bob@example.com", "g-2", "Bob")).await.expect("login");

    let result = harness.gateway.federated_login(google("carol@example.com", "g-2", "Carol")).await;
    assert_auth_error!(result, IdentityAlreadyLinked);

    // No session was issued and the password still works
    assert!(harness.sessions.find_by_principal(carol.id).await.expect("store").is_none());
    let session = harness.login("carol@example.com", "pw").await.expect("local login");
    assert_eq!(session.principal.origin, "LOCAL");
}

#[tokio::test]
async fn test_federated_principal_cannot_use_password_login() {
    let harness = TestHarness::new();
    harness.gateway.federated_login(google("bob@example.com", "g-123", "Bob")).await.expect("login");

    assert_auth_error!(harness.login("bob@example.com", "").await, InvalidCredentials);
    assert_auth_error!(harness.login("bob@example.com", "anything").await, InvalidCredentials);
}

#[tokio::test]
async fn test_federated_login_without_email_creates_nothing() {
    let harness = TestHarness::new();
    let assertion =
        FederatedAssertion::builder().provider("google").provider_subject_id("g-1").build();

    let result = harness.gateway.federated_login(assertion).await;
    assert_auth_error!(result, MissingIdentityAttribute);
    assert!(harness.backend.is_empty());
}

// ---------------------------------------------------------------------------
// Store outages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stalled_store_surfaces_as_unavailable() {
    let (_backend, _principals, sessions) = memory_stores();
    let gateway = gateway_over(
        Arc::new(StalledPrincipalStore),
        Arc::new(sessions) as Arc<dyn SessionStore>,
        Duration::from_millis(50),
    );

    let result = gateway
        .login(
            yeoladin_authn::LoginRequest::builder()
                .identifier("alice@example.com")
                .secret("pw".to_owned())
                .build(),
        )
        .await;
    match result {
        Err(err @ AuthError::StoreUnavailable(_)) => assert!(err.is_retryable()),
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }

    let result = gateway.federated_login(google("bob@example.com", "g-1", "Bob")).await;
    assert_auth_error!(result, StoreUnavailable);
}
