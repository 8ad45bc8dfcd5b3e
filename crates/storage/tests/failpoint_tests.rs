#![cfg(feature = "failpoints")]
#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p yeoladin-storage --features failpoints --test failpoint_tests
//! ```

use chrono::Duration;
use yeoladin_storage::{
    StorageError,
    auth::{PrincipalStore, SESSION_PREFIX, SessionStore},
    testutil::{memory_stores, new_local, session_for},
};

#[tokio::test]
async fn session_lookup_read_failure_is_transient() {
    let scenario = fail::FailScenario::setup();
    let (_backend, principals, sessions) = memory_stores();
    let alice = principals.create(new_local("alice@example.com", "Alice")).await.expect("create");
    sessions.put(session_for(alice.id, "r1", Duration::days(1))).await.expect("put");

    fail::cfg("memory-get", "return").expect("failed to configure fail point");

    let result = sessions.find_by_token("r1").await;
    match result {
        Err(err @ StorageError::Connection { .. }) => assert!(err.is_transient()),
        other => panic!("expected connection error, got {other:?}"),
    }

    fail::remove("memory-get");

    // The session survives the outage
    assert!(sessions.find_by_token("r1").await.expect("lookup").is_some());

    scenario.teardown();
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_session() {
    let scenario = fail::FailScenario::setup();
    let (backend, principals, sessions) = memory_stores();
    let alice = principals.create(new_local("alice@example.com", "Alice")).await.expect("create");

    fail::cfg("memory-commit", "return").expect("failed to configure fail point");

    let result = sessions.put(session_for(alice.id, "r1", Duration::days(1))).await;
    assert!(matches!(result, Err(StorageError::Connection { .. })), "got {result:?}");

    fail::remove("memory-commit");

    assert!(backend.keys_with_prefix(SESSION_PREFIX.as_bytes()).is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn failed_commit_keeps_current_session_on_rotation() {
    let scenario = fail::FailScenario::setup();
    let (_backend, principals, sessions) = memory_stores();
    let alice = principals.create(new_local("alice@example.com", "Alice")).await.expect("create");
    sessions.put(session_for(alice.id, "r1", Duration::days(1))).await.expect("put");

    fail::cfg("memory-commit", "return").expect("failed to configure fail point");

    let result = sessions.rotate("r1", session_for(alice.id, "r2", Duration::days(1))).await;
    assert!(result.is_err(), "rotation should surface the commit failure");

    fail::remove("memory-commit");

    assert!(sessions.find_by_token("r1").await.expect("lookup").is_some());
    assert!(sessions.find_by_token("r2").await.expect("lookup").is_none());

    scenario.teardown();
}

#[tokio::test]
async fn principal_create_write_failure_is_not_retried() {
    let scenario = fail::FailScenario::setup();
    let (backend, principals, _sessions) = memory_stores();

    fail::cfg("memory-commit", "return").expect("failed to configure fail point");

    let result = principals.create(new_local("alice@example.com", "Alice")).await;
    assert!(matches!(result, Err(StorageError::Connection { .. })), "got {result:?}");

    fail::remove("memory-commit");

    assert!(backend.is_empty());

    scenario.teardown();
}
