//! Persistence for principals and their uniqueness indexes.
//!
//! # Key layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `principals/next-id` | last allocated id (decimal) |
//! | `principals/id/{id}` | JSON [`Principal`] |
//! | `principals/email/{lowercase email}` | id |
//! | `principals/provider/{PROVIDER}/{subject}` | id |
//!
//! The record and every index entry it owns are written in one transaction.
//! Index entries are claimed with insert-if-absent, so two writers racing
//! for the same email cannot both succeed.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    auth::principal::{NewPrincipal, Origin, Principal, Provider, normalize_email},
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    retry::{CasRetryConfig, with_cas_retry},
    types::PrincipalId,
};

/// Storage key prefix for everything the principal store owns.
pub const PRINCIPAL_PREFIX: &str = "principals/";

const NEXT_ID_KEY: &str = "principals/next-id";

/// Persistence layer for [`Principal`] records.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Looks up a principal by id.
    async fn find_by_id(&self, id: PrincipalId) -> StorageResult<Option<Principal>>;

    /// Looks up a principal by email, ignoring case.
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<Principal>>;

    /// Looks up the principal federated through this provider identity.
    async fn find_by_provider_subject(
        &self,
        provider: &Provider,
        subject_id: &str,
    ) -> StorageResult<Option<Principal>>;

    /// Creates a principal and allocates its id.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if the email, or the provider identity of a federated
    ///   origin, already belongs to a principal
    /// - [`StorageError::Internal`] if a local origin carries an empty password hash
    async fn create(&self, new: NewPrincipal) -> StorageResult<Principal>;

    /// Replaces a stored principal, moving index entries if the email or
    /// provider identity changed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no principal has this id
    /// - [`StorageError::AlreadyExists`] if the new email or provider identity belongs to another
    ///   principal
    async fn update(&self, principal: &Principal) -> StorageResult<()>;
}

/// [`PrincipalStore`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct BackendPrincipalStore<B> {
    backend: B,
    cas_retry: CasRetryConfig,
}

impl<B: StorageBackend> BackendPrincipalStore<B> {
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

    fn id_key(id: PrincipalId) -> String {
        format!("{PRINCIPAL_PREFIX}id/{id}")
    }

    fn email_key(email: &str) -> String {
        format!("{PRINCIPAL_PREFIX}email/{}", normalize_email(email))
    }

    fn provider_key(provider: &Provider, subject_id: &str) -> String {
        format!("{PRINCIPAL_PREFIX}provider/{provider}/{subject_id}")
    }

    fn origin_key(origin: &Origin) -> Option<String> {
        origin.provider_identity().map(|(provider, subject)| Self::provider_key(provider, subject))
    }

    fn decode_id(bytes: &[u8]) -> StorageResult<PrincipalId> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::serialization("principal index entry is not an id"))
    }

    fn decode_principal(bytes: &[u8]) -> StorageResult<Principal> {
        Ok(serde_json::from_slice(bytes)?)
    }

    async fn load(&self, id: PrincipalId) -> StorageResult<Option<(Principal, Bytes)>> {
        match self.backend.get(Self::id_key(id).as_bytes()).await? {
            Some(bytes) => Ok(Some((Self::decode_principal(&bytes)?, bytes))),
            None => Ok(None),
        }
    }

    async fn find_via_index(&self, index_key: &str) -> StorageResult<Option<Principal>> {
        let Some(id_bytes) = self.backend.get(index_key.as_bytes()).await? else {
            return Ok(None);
        };
        let id = Self::decode_id(&id_bytes)?;
        match self.load(id).await? {
            Some((principal, _)) => Ok(Some(principal)),
            None => {
                tracing::warn!(index_key, principal_id = %id, "index entry points at missing principal");
                Ok(None)
            },
        }
    }

    /// Fails with `AlreadyExists` if `index_key` maps to a principal other
    /// than `owner`.
    async fn ensure_index_free(
        &self,
        index_key: &str,
        owner: Option<PrincipalId>,
    ) -> StorageResult<()> {
        if let Some(bytes) = self.backend.get(index_key.as_bytes()).await? {
            let holder = Self::decode_id(&bytes)?;
            if Some(holder) != owner {
                return Err(StorageError::already_exists(index_key));
            }
        }
        Ok(())
    }

    async fn try_create(&self, new: &NewPrincipal) -> StorageResult<Principal> {
        let email_key = Self::email_key(&new.email);
        let provider_key = Self::origin_key(&new.origin);

        self.ensure_index_free(&email_key, None).await?;
        if let Some(key) = &provider_key {
            self.ensure_index_free(key, None).await?;
        }

        let mut txn = self.backend.transaction().await?;

        let current = txn.get(NEXT_ID_KEY.as_bytes()).await?;
        let last_id = match &current {
            Some(bytes) => Self::decode_id(bytes)?,
            None => PrincipalId::from(0),
        };
        let id = PrincipalId::from(i64::from(last_id) + 1);

        let principal = Principal {
            id,
            email: new.email.trim().to_owned(),
            display_name: new.display_name.clone(),
            origin: new.origin.clone(),
            role: new.role.clone(),
        };
        let id_bytes = id.to_string().into_bytes();

        txn.compare_and_set(
            NEXT_ID_KEY.as_bytes().to_vec(),
            current.map(|b| b.to_vec()),
            id_bytes.clone(),
        )?;
        txn.compare_and_set(email_key.into_bytes(), None, id_bytes.clone())?;
        if let Some(key) = provider_key {
            txn.compare_and_set(key.into_bytes(), None, id_bytes)?;
        }
        txn.set(Self::id_key(id).into_bytes(), serde_json::to_vec(&principal)?);
        txn.commit().await?;

        Ok(principal)
    }

    async fn try_update(&self, principal: &Principal) -> StorageResult<()> {
        let Some((stored, stored_bytes)) = self.load(principal.id).await? else {
            return Err(StorageError::not_found(Self::id_key(principal.id)));
        };

        let old_email_key = Self::email_key(&stored.email);
        let new_email_key = Self::email_key(&principal.email);
        let old_provider_key = Self::origin_key(&stored.origin);
        let new_provider_key = Self::origin_key(&principal.origin);

        if new_email_key != old_email_key {
            self.ensure_index_free(&new_email_key, Some(principal.id)).await?;
        }
        if let Some(key) = &new_provider_key
            && new_provider_key != old_provider_key
        {
            self.ensure_index_free(key, Some(principal.id)).await?;
        }

        let id_bytes = principal.id.to_string().into_bytes();
        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(
            Self::id_key(principal.id).into_bytes(),
            Some(stored_bytes.to_vec()),
            serde_json::to_vec(principal)?,
        )?;

        if new_email_key != old_email_key {
            txn.compare_and_set(new_email_key.into_bytes(), None, id_bytes.clone())?;
            txn.delete(old_email_key.into_bytes());
        }
        if new_provider_key != old_provider_key {
            if let Some(key) = new_provider_key {
                txn.compare_and_set(key.into_bytes(), None, id_bytes)?;
            }
            if let Some(key) = old_provider_key {
                txn.delete(key.into_bytes());
            }
        }

        txn.commit().await
    }
}

fn check_origin(origin: &Origin) -> StorageResult<()> {
    match origin {
        Origin::Local { password_hash } if password_hash.is_empty() => {
            Err(StorageError::internal("local principal requires a password hash"))
        },
        Origin::Federated { subject_id, .. } if subject_id.is_empty() => {
            Err(StorageError::internal("federated principal requires a subject id"))
        },
        _ => Ok(()),
    }
}

#[async_trait]
impl<B: StorageBackend> PrincipalStore for BackendPrincipalStore<B> {
    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: PrincipalId) -> StorageResult<Option<Principal>> {
        Ok(self.load(id).await?.map(|(principal, _)| principal))
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<Principal>> {
        self.find_via_index(&Self::email_key(email)).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_provider_subject(
        &self,
        provider: &Provider,
        subject_id: &str,
    ) -> StorageResult<Option<Principal>> {
        self.find_via_index(&Self::provider_key(provider, subject_id)).await
    }

    #[tracing::instrument(skip_all, fields(origin = new.origin.label()))]
    async fn create(&self, new: NewPrincipal) -> StorageResult<Principal> {
        check_origin(&new.origin)?;

        let principal = with_cas_retry(&self.cas_retry, || self.try_create(&new)).await?;
        tracing::debug!(principal_id = %principal.id, "principal created");
        Ok(principal)
    }

    #[tracing::instrument(skip_all, fields(principal_id = %principal.id))]
    async fn update(&self, principal: &Principal) -> StorageResult<()> {
        check_origin(&principal.origin)?;

        with_cas_retry(&self.cas_retry, || self.try_update(principal)).await
    }
}
