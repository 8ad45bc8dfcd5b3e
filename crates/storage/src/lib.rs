//! Storage layer for the yeoladin authentication core.
//!
//! The crate is organised in two layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 yeoladin-authn                      │
//! │       (gateway, reconciler, credential signer)      │
//! ├─────────────────────────────────────────────────────┤
//! │                    auth                             │
//! │     PrincipalStore        │      SessionStore       │
//! │  (records, unique indexes, lazy expiry, rotation)   │
//! ├─────────────────────────────────────────────────────┤
//! │               StorageBackend trait                  │
//! │   (get, set, compare_and_set, delete, transaction)  │
//! ├─────────────────────────────────────────────────────┤
//! │                  MemoryBackend                      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use yeoladin_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"principals/next-id".to_vec(), b"0".to_vec()).await?;
//!
//!     // Insert-if-absent fails once the key exists
//!     let second = backend.compare_and_set(b"principals/next-id", None, b"1".to_vec()).await;
//!     assert!(second.is_err());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. [`StorageError::is_transient`]
//! separates outages (connection failures, timeouts) from logical failures
//! such as [`StorageError::AlreadyExists`].
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with fixtures and assertion macros for
//!   integration tests.
//! - **`failpoints`**: Compiles the `fail_point!` sites in [`MemoryBackend`] and the retry loop.

#![deny(unsafe_code)]

pub mod auth;
pub mod backend;
pub mod error;
pub mod memory;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{CasRetryConfig, with_cas_retry, with_timeout};
pub use transaction::Transaction;
pub use types::PrincipalId;
pub use zeroize::Zeroizing;
