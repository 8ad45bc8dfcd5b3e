//! Principal and refresh-session persistence.
//!
//! Both stores are written against [`StorageBackend`](crate::StorageBackend)
//! and keep their secondary indexes consistent through transactions.
//!
//! # Key layout
//!
//! ```text
//! principals/next-id                       last allocated id
//! principals/id/{id}                       JSON Principal
//! principals/email/{lowercased email}      id
//! principals/provider/{PROVIDER}/{subject} id
//! sessions/principal/{id}                  JSON RefreshSession
//! sessions/token/{sha256 hex of token}     id
//! ```
//!
//! # Examples
//!
//! ```
//! use yeoladin_storage::MemoryBackend;
//! use yeoladin_storage::auth::{
//!     BackendPrincipalStore, NewPrincipal, Origin, PrincipalStore, Provider,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = BackendPrincipalStore::new(MemoryBackend::new());
//!
//! let created = store
//!     .create(
//!         NewPrincipal::builder()
//!             .email("bob@example.com")
//!             .display_name("Bob")
//!             .origin(Origin::federated(Provider::new("google"), "g-123"))
//!             .build(),
//!     )
//!     .await
//!     .unwrap();
//!
//! let found = store.find_by_email("BOB@example.com").await.unwrap().unwrap();
//! assert_eq!(found.id, created.id);
//! # });
//! ```

mod principal;
mod principal_store;
mod session;
mod session_store;

pub use principal::{
    DEFAULT_ROLE, NewPrincipal, Origin, Principal, PrincipalProfile, Provider, normalize_email,
};
pub use principal_store::{BackendPrincipalStore, PRINCIPAL_PREFIX, PrincipalStore};
pub use session::RefreshSession;
pub use session_store::{BackendSessionStore, SESSION_PREFIX, SessionStore};
