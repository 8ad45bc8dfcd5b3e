//! Maps federated identity assertions onto principals.
//!
//! Email is the correlation key. An assertion for an email nobody holds
//! creates a federated principal; an assertion for a known email either
//! refreshes the display name (same provider) or re-links the principal to
//! the asserting provider. A re-link onto a provider identity that another
//! principal already holds is refused with
//! [`AuthError::IdentityAlreadyLinked`].
//!
//! Re-linking also applies to locally registered principals: after a
//! federated login for their email, password login stops working. This is
//! the established behaviour and is kept until product review decides
//! otherwise.

use std::{sync::Arc, time::Duration};

use yeoladin_storage::{
    StorageError, StorageResult,
    auth::{NewPrincipal, Origin, Principal, PrincipalStore, Provider},
    with_timeout,
};

use crate::error::{AuthError, Result};

/// An identity claim from an external provider, after that provider has
/// authenticated the user.
#[derive(Debug, Clone, bon::Builder)]
pub struct FederatedAssertion {
    /// Provider registration id, e.g. `google`. Normalised to upper case.
    #[builder(into)]
    pub provider: String,
    /// The provider's stable subject identifier.
    #[builder(into)]
    pub provider_subject_id: String,
    /// Email released by the provider.
    #[builder(into)]
    pub email: Option<String>,
    /// Name released by the provider.
    #[builder(into)]
    pub display_name: Option<String>,
}

/// Validated attributes of an assertion.
struct Identity<'a> {
    email: &'a str,
    provider: Provider,
    subject_id: &'a str,
    display_name: Option<&'a str>,
}

impl FederatedAssertion {
    fn identity(&self) -> Result<Identity<'_>> {
        let email = self
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthError::missing_attribute("email"))?;

        if self.provider.trim().is_empty() {
            return Err(AuthError::missing_attribute("provider"));
        }

        let subject_id = self.provider_subject_id.trim();
        if subject_id.is_empty() {
            return Err(AuthError::missing_attribute("provider_subject_id"));
        }

        Ok(Identity {
            email,
            provider: Provider::new(&self.provider),
            subject_id,
            display_name: self.display_name.as_deref().map(str::trim).filter(|n| !n.is_empty()),
        })
    }
}

/// Why a reconciliation pass stopped without a principal.
enum Rejection {
    Storage(StorageError),
    IdentityTaken { provider: Provider },
}

impl From<StorageError> for Rejection {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Storage(err) => err.into(),
            Rejection::IdentityTaken { provider } => {
                AuthError::IdentityAlreadyLinked { provider: provider.as_str().to_owned() }
            },
        }
    }
}

/// Resolves federated assertions to persisted principals.
#[derive(Clone)]
pub struct IdentityReconciler {
    principals: Arc<dyn PrincipalStore>,
    store_timeout: Duration,
}

impl std::fmt::Debug for IdentityReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityReconciler")
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl IdentityReconciler {
    /// Creates a reconciler whose store calls are bounded by `store_timeout`.
    #[must_use]
    pub fn new(principals: Arc<dyn PrincipalStore>, store_timeout: Duration) -> Self {
        Self { principals, store_timeout }
    }

    /// Finds, creates, or updates the principal for `assertion`.
    ///
    /// The principal is persisted before this returns.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingIdentityAttribute`] if the email, provider, or subject id is absent
    /// - [`AuthError::IdentityAlreadyLinked`] if a re-link targets a provider identity held by
    ///   another principal
    /// - [`AuthError::StoreUnavailable`] if the store fails or times out
    #[tracing::instrument(skip_all, fields(provider = %assertion.provider))]
    pub async fn resolve(&self, assertion: &FederatedAssertion) -> Result<Principal> {
        let identity = assertion.identity()?;

        match self.reconcile(&identity).await {
            // Another login for the same email or identity created it first
            Err(Rejection::Storage(StorageError::AlreadyExists { key })) => {
                tracing::debug!(key = %key, "lost principal creation race, resolving again");
                Ok(self.reconcile(&identity).await?)
            },
            result => Ok(result?),
        }
    }

    async fn reconcile(&self, identity: &Identity<'_>) -> std::result::Result<Principal, Rejection> {
        let by_email = with_timeout(
            self.store_timeout,
            "find_by_email",
            self.principals.find_by_email(identity.email),
        )
        .await?;
        if let Some(existing) = by_email {
            return self.reconcile_existing(existing, identity).await;
        }

        let by_identity = with_timeout(
            self.store_timeout,
            "find_by_provider_subject",
            self.principals.find_by_provider_subject(&identity.provider, identity.subject_id),
        )
        .await?;
        if let Some(existing) = by_identity {
            tracing::warn!(
                principal_id = %existing.id,
                provider = %identity.provider,
                "provider identity asserted with a new email, keeping stored principal",
            );
            return Ok(existing);
        }

        let new = NewPrincipal::builder()
            .email(identity.email)
            .display_name(identity.display_name.unwrap_or(identity.email))
            .origin(Origin::federated(identity.provider.clone(), identity.subject_id))
            .build();
        let created =
            with_timeout(self.store_timeout, "create_principal", self.principals.create(new))
                .await?;

        tracing::info!(
            principal_id = %created.id,
            origin = %identity.provider,
            "federated principal created",
        );
        Ok(created)
    }

    async fn reconcile_existing(
        &self,
        existing: Principal,
        identity: &Identity<'_>,
    ) -> std::result::Result<Principal, Rejection> {
        // Same provider: the stored subject id is kept as is
        let same_provider = matches!(
            &existing.origin,
            Origin::Federated { provider, .. } if *provider == identity.provider
        );
        if same_provider {
            let Some(name) = identity.display_name.filter(|n| *n != existing.display_name) else {
                return Ok(existing);
            };

            let mut updated = existing;
            updated.display_name = name.to_owned();
            self.update(&updated).await?;
            tracing::debug!(principal_id = %updated.id, "display name refreshed from provider");
            return Ok(updated);
        }

        let holder = with_timeout(
            self.store_timeout,
            "find_by_provider_subject",
            self.principals.find_by_provider_subject(&identity.provider, identity.subject_id),
        )
        .await?;
        if let Some(holder) = holder {
            tracing::warn!(
                principal_id = %existing.id,
                holder_id = %holder.id,
                provider = %identity.provider,
                "re-link refused, provider identity belongs to another principal",
            );
            return Err(Rejection::IdentityTaken { provider: identity.provider.clone() });
        }

        let previous = existing.origin.label().to_owned();
        let mut updated = existing;
        updated.origin = Origin::federated(identity.provider.clone(), identity.subject_id);
        self.update(&updated).await?;

        tracing::warn!(
            principal_id = %updated.id,
            email = %updated.email,
            from = %previous,
            to = %identity.provider,
            "principal re-linked to a different identity provider",
        );
        Ok(updated)
    }

    async fn update(&self, principal: &Principal) -> StorageResult<()> {
        with_timeout(self.store_timeout, "update_principal", self.principals.update(principal)).await
    }
}
