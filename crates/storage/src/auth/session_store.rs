//! Persistence for refresh sessions, one per principal.
//!
//! # Key layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `sessions/principal/{id}` | JSON [`RefreshSession`] |
//! | `sessions/token/{sha256 hex of token}` | id |
//!
//! The row keyed by principal is authoritative. The token index only
//! locates it, and every token lookup confirms that the row still holds the
//! presented token. Raw tokens never appear in keys.
//!
//! Expired rows are removed lazily by the read that finds them.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::{
    auth::session::RefreshSession,
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    retry::{CasRetryConfig, with_cas_retry},
    types::PrincipalId,
};

/// Storage key prefix for everything the session store owns.
pub const SESSION_PREFIX: &str = "sessions/";

/// Persistence layer for [`RefreshSession`] records.
///
/// At most one session exists per principal. Writing a new session for a
/// principal supersedes the previous one, and the superseded token stops
/// being found immediately.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores `session` as the principal's only session. Last writer wins.
    async fn put(&self, session: RefreshSession) -> StorageResult<()>;

    /// Finds the session whose token is exactly `token`.
    ///
    /// Returns `None` if the token was never stored, has been superseded, or
    /// has expired. An expired row is deleted as part of the lookup.
    async fn find_by_token(&self, token: &str) -> StorageResult<Option<RefreshSession>>;

    /// Finds the principal's current session, applying the same lazy expiry
    /// as [`find_by_token`](Self::find_by_token).
    async fn find_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> StorageResult<Option<RefreshSession>>;

    /// Deletes the session holding `token`, if any. Idempotent.
    async fn delete_by_token(&self, token: &str) -> StorageResult<()>;

    /// Deletes the principal's session, if any. Idempotent.
    async fn delete_by_principal(&self, principal_id: PrincipalId) -> StorageResult<()>;

    /// Replaces the session of `next.principal_id` with `next`, but only if
    /// the stored session still holds `presented` and has not expired.
    ///
    /// Returns `false` when the precondition fails, including when a
    /// concurrent rotation with the same token won the race.
    async fn rotate(&self, presented: &str, next: RefreshSession) -> StorageResult<bool>;
}

/// [`SessionStore`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendSessionStore<B> {
    backend: B,
    cas_retry: CasRetryConfig,
}

impl<B: StorageBackend> BackendSessionStore<B> {
    /// Creates a store with the default retry policy.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend, cas_retry: CasRetryConfig::default() }
    }

    /// Configures the retry policy for compare-and-set conflicts.
    #[must_use]
    pub fn with_cas_retry_config(mut self, config: CasRetryConfig) -> Self {
        self.cas_retry = config;
        self
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn principal_key(principal_id: PrincipalId) -> Vec<u8> {
        format!("{SESSION_PREFIX}principal/{principal_id}").into_bytes()
    }

    /// Index key for a token: its SHA-256 digest, hex encoded.
    pub fn token_key(token: &str) -> Vec<u8> {
        let digest = Sha256::digest(token.as_bytes());
        format!("{SESSION_PREFIX}token/{}", hex::encode(digest)).into_bytes()
    }

    fn decode(bytes: &[u8]) -> StorageResult<RefreshSession> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn decode_id(bytes: &[u8]) -> StorageResult<PrincipalId> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::serialization("session index entry is not an id"))
    }

    async fn load(
        &self,
        principal_id: PrincipalId,
    ) -> StorageResult<Option<(RefreshSession, Bytes)>> {
        match self.backend.get(&Self::principal_key(principal_id)).await? {
            Some(bytes) => Ok(Some((Self::decode(&bytes)?, bytes))),
            None => Ok(None),
        }
    }

    /// Deletes the row and its index entry if the row still equals `stored`.
    ///
    /// Fails with [`StorageError::Conflict`] if the row changed.
    async fn try_remove(&self, session: &RefreshSession, stored: &Bytes) -> StorageResult<()> {
        let key = Self::principal_key(session.principal_id);
        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(key.clone(), Some(stored.to_vec()), stored.to_vec())?;
        txn.delete(key);
        txn.delete(Self::token_key(&session.token));
        txn.commit().await
    }

    /// Drops an expired row unless a concurrent writer already replaced it.
    async fn expire(&self, session: &RefreshSession, stored: &Bytes) -> StorageResult<()> {
        match self.try_remove(session, stored).await {
            Ok(()) | Err(StorageError::Conflict) => {
                tracing::debug!(principal_id = %session.principal_id, "expired session purged");
                Ok(())
            },
            Err(e) => Err(e),
        }
    }

    async fn try_put(&self, session: &RefreshSession) -> StorageResult<()> {
        let key = Self::principal_key(session.principal_id);
        let value = serde_json::to_vec(session)?;

        let mut txn = self.backend.transaction().await?;
        match txn.get(&key).await? {
            Some(stored) => {
                let previous = Self::decode(&stored)?;
                txn.compare_and_set(key, Some(stored.to_vec()), value)?;
                if previous.token != session.token {
                    txn.delete(Self::token_key(&previous.token));
                }
            },
            None => txn.compare_and_set(key, None, value)?,
        }
        txn.set(Self::token_key(&session.token), session.principal_id.to_string().into_bytes());
        txn.commit().await
    }
}

#[async_trait]
impl<B: StorageBackend> SessionStore for BackendSessionStore<B> {
    #[tracing::instrument(skip_all, fields(principal_id = %session.principal_id))]
    async fn put(&self, session: RefreshSession) -> StorageResult<()> {
        with_cas_retry(&self.cas_retry, || self.try_put(&session)).await
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_token(&self, token: &str) -> StorageResult<Option<RefreshSession>> {
        let token_key = Self::token_key(token);
        let Some(id_bytes) = self.backend.get(&token_key).await? else {
            return Ok(None);
        };
        let principal_id = Self::decode_id(&id_bytes)?;

        let Some((session, stored)) = self.load(principal_id).await? else {
            tracing::warn!(principal_id = %principal_id, "dropping token index entry without session");
            self.backend.delete(&token_key).await?;
            return Ok(None);
        };

        if session.token.as_str() != token {
            tracing::warn!(principal_id = %principal_id, "dropping superseded token index entry");
            self.backend.delete(&token_key).await?;
            return Ok(None);
        }

        if session.is_expired() {
            self.expire(&session, &stored).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> StorageResult<Option<RefreshSession>> {
        let Some((session, stored)) = self.load(principal_id).await? else {
            return Ok(None);
        };

        if session.is_expired() {
            self.expire(&session, &stored).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    #[tracing::instrument(skip_all)]
    async fn delete_by_token(&self, token: &str) -> StorageResult<()> {
        let token_key = Self::token_key(token);
        let Some(id_bytes) = self.backend.get(&token_key).await? else {
            return Ok(());
        };
        let principal_id = Self::decode_id(&id_bytes)?;

        if let Some((session, stored)) = self.load(principal_id).await?
            && session.token.as_str() == token
        {
            match self.try_remove(&session, &stored).await {
                // A concurrent write replaced the row and dropped this index entry.
                Ok(()) | Err(StorageError::Conflict) => {},
                Err(e) => return Err(e),
            }
        }

        self.backend.delete(&token_key).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_by_principal(&self, principal_id: PrincipalId) -> StorageResult<()> {
        with_cas_retry(&self.cas_retry, || async move {
            match self.load(principal_id).await? {
                Some((session, stored)) => self.try_remove(&session, &stored).await,
                None => Ok(()),
            }
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(principal_id = %next.principal_id))]
    async fn rotate(&self, presented: &str, next: RefreshSession) -> StorageResult<bool> {
        let key = Self::principal_key(next.principal_id);
        let Some((current, stored)) = self.load(next.principal_id).await? else {
            return Ok(false);
        };

        if current.token.as_str() != presented || current.is_expired() {
            return Ok(false);
        }

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(key, Some(stored.to_vec()), serde_json::to_vec(&next)?)?;
        txn.delete(Self::token_key(presented));
        txn.set(Self::token_key(&next.token), next.principal_id.to_string().into_bytes());

        match txn.commit().await {
            Ok(()) => {
                tracing::debug!("refresh session rotated");
                Ok(true)
            },
            Err(StorageError::Conflict) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
