//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every key in a [`BTreeMap`] behind a single
//! [`parking_lot::RwLock`]. Transactions buffer their writes and apply them
//! under one write guard, so a commit is atomic with respect to every other
//! reader and writer.
//!
//! # Example
//!
//! ```
//! use yeoladin_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Fail points
//!
//! With the `failpoints` feature the backend exposes the following points,
//! each of which can be configured to `return` a connection error:
//!
//! | Name | Operation |
//! |------|-----------|
//! | `memory-get` | [`StorageBackend::get`] and transactional reads |
//! | `memory-write` | `set`, `compare_and_set`, `delete` |
//! | `memory-commit` | [`Transaction::commit`] |
//!
//! # Limitations
//!
//! Data is not persisted; everything is lost when the process exits.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

type Store = BTreeMap<Vec<u8>, Bytes>;

/// In-memory storage backend using [`BTreeMap`].
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Store>>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("keys", &self.data.read().len()).finish()
    }
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` when no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns every stored key that starts with `prefix`, in key order.
    ///
    /// Intended for assertions in tests and for operational inspection.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn matches_expected(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(expected), Some(current)) => expected == &current[..],
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected fault: memory-get")));

        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        fail_point!("memory-write", |_| {
            Err(StorageError::connection("injected fault: memory-write"))
        });

        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        fail_point!("memory-write", |_| {
            Err(StorageError::connection("injected fault: memory-write"))
        });

        let mut data = self.data.write();
        if !matches_expected(expected, data.get(key)) {
            return Err(StorageError::conflict());
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        fail_point!("memory-write", |_| {
            Err(StorageError::connection("injected fault: memory-write"))
        });

        self.data.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
}

/// In-memory transaction.
///
/// Buffers writes and deletes until commit, providing read-your-writes
/// semantics within the transaction.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }

        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value });
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail_point!("memory-commit", |_| {
            Err(StorageError::connection("injected fault: memory-commit"))
        });

        let Self { backend, pending_writes, pending_cas } = *self;
        let mut data = backend.data.write();

        for cas in &pending_cas {
            if !matches_expected(cas.expected.as_deref(), data.get(&cas.key)) {
                return Err(StorageError::conflict());
            }
        }

        for cas in pending_cas {
            data.insert(cas.key, Bytes::from(cas.new_value));
        }

        for (key, value) in pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
