//! Storage backend trait definition.
//!
//! [`StorageBackend`] is a minimal byte-oriented key-value interface. The
//! principal and session stores in [`crate::auth`] are written against it
//! and never see backend internals.
//!
//! - Keys and values are bytes; serialization belongs to the stores.
//! - Every operation is async.
//! - Multi-key changes go through a [`Transaction`] so index entries and
//!   records move together.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction};

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe (`Send + Sync`) and support concurrent
/// operations.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use yeoladin_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// - `expected: None` is insert-if-absent.
    /// - `expected: Some(value)` is update-if-unchanged. The comparison is an exact byte equality
    ///   check.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`](crate::StorageError::Conflict) when the current value does not
    /// match `expected`. Conflicts are not transient; callers run their own
    /// read-modify-write loop (see [`with_cas_retry`](crate::with_cas_retry)).
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Deletes a key. Deleting a missing key is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;
}
