//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on store operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use chrono::Duration;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};
use yeoladin_storage::{
    MemoryBackend, StorageBackend,
    auth::{PrincipalStore, SessionStore},
    testutil::{memory_stores, new_federated, session_for},
};

// ---------------------------------------------------------------------------
// Collecting layer, records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_operations_create_spans() {
    let (spans, _guard) = collect();

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set should succeed");
    let _ = backend.get(b"key-1").await;
    backend.delete(b"key-1").await.expect("delete should succeed");
    let txn = backend.transaction().await.expect("transaction");
    txn.commit().await.expect("commit");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["set", "get", "delete", "transaction", "commit"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[tokio::test]
async fn principal_store_operations_create_spans() {
    let (spans, _guard) = collect();

    let (_backend, principals, _sessions) = memory_stores();
    let bob = principals
        .create(new_federated("bob@example.com", "Bob", "google", "g-123"))
        .await
        .expect("create");
    let _ = principals.find_by_email("bob@example.com").await;
    principals.update(&bob).await.expect("update");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["create", "find_by_email", "update", "with_cas_retry"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn session_store_operations_create_spans() {
    let (spans, _guard) = collect();

    let (_backend, principals, sessions) = memory_stores();
    let bob = principals
        .create(new_federated("bob@example.com", "Bob", "google", "g-123"))
        .await
        .expect("create");
    sessions.put(session_for(bob.id, "r1", Duration::days(1))).await.expect("put");
    let _ = sessions.find_by_token("r1").await;
    let _ = sessions.rotate("r1", session_for(bob.id, "r2", Duration::days(1))).await;
    sessions.delete_by_token("r2").await.expect("delete");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["put", "find_by_token", "rotate", "delete_by_token"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}
