//! Transaction trait for atomic storage operations.
//!
//! Transactions buffer writes until [`Transaction::commit`], read their own
//! pending writes, and apply everything or nothing. Compare-and-set
//! preconditions are evaluated at commit time, which is how the session
//! store makes rotation a single atomic step.
//!
//! # Example
//!
//! ```
//! use yeoladin_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"sessions/principal/1".to_vec(), b"old".to_vec()).await.unwrap();
//!
//! // Replace the record and move its index entry in one step
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"sessions/principal/1".to_vec(), Some(b"old".to_vec()), b"new".to_vec())
//!     .unwrap();
//! txn.delete(b"sessions/token/old".to_vec());
//! txn.set(b"sessions/token/new".to_vec(), b"1".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"sessions/token/old").await.unwrap().is_none());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// # Concurrency
///
/// Transactions are optimistic. If a buffered compare-and-set no longer
/// holds when [`commit`](Transaction::commit) runs, the whole transaction is
/// rejected with [`StorageError::Conflict`](crate::StorageError::Conflict)
/// and nothing is applied.
#[async_trait]
pub trait Transaction: Send {
    /// Gets a value within the transaction.
    ///
    /// Pending writes and deletes in this transaction take precedence over
    /// the committed state.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation.
    ///
    /// The condition is checked at commit time, not when this method is
    /// called. `expected: None` requires the key to be absent.
    ///
    /// Buffered compare-and-set writes are applied before plain writes and
    /// deletes, so a compare-and-set that re-writes the current value
    /// followed by a [`delete`](Transaction::delete) of the same key acts as
    /// a conditional delete.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any compare-and-set
    ///   precondition no longer holds
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
