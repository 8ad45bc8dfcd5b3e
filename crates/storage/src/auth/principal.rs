//! Principal records: locally registered and federated accounts.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::types::PrincipalId;

/// Authority label assigned to principals created without an explicit role.
pub const DEFAULT_ROLE: &str = "ROLE_USER";

/// Provider tag for a federated identity, normalised to upper case.
///
/// ```
/// use yeoladin_storage::auth::Provider;
///
/// assert_eq!(Provider::new("google").as_str(), "GOOGLE");
/// assert_eq!(Provider::new(" Kakao "), Provider::new("KAKAO"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    /// Creates a provider tag from a registration id such as `google`.
    #[must_use]
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_uppercase())
    }

    /// Returns the normalised tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a principal authenticates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Registered with a password held by this system.
    Local {
        /// PHC-format password hash. Never empty.
        password_hash: Zeroizing<String>,
    },
    /// Authenticated by an external identity provider.
    Federated {
        /// Normalised provider tag.
        provider: Provider,
        /// The provider's stable subject identifier.
        subject_id: String,
    },
}

impl Origin {
    /// Creates a federated origin.
    #[must_use]
    pub fn federated(provider: Provider, subject_id: impl Into<String>) -> Self {
        Self::Federated { provider, subject_id: subject_id.into() }
    }

    /// Creates a local origin from a PHC-format password hash.
    #[must_use]
    pub fn local(password_hash: impl Into<String>) -> Self {
        Self::Local { password_hash: Zeroizing::new(password_hash.into()) }
    }

    /// Label used in logs and profiles: `LOCAL` or the provider tag.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Local { .. } => "LOCAL",
            Self::Federated { provider, .. } => provider.as_str(),
        }
    }

    /// Returns the provider and subject for federated origins.
    #[must_use]
    pub fn provider_identity(&self) -> Option<(&Provider, &str)> {
        match self {
            Self::Local { .. } => None,
            Self::Federated { provider, subject_id } => Some((provider, subject_id)),
        }
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { .. } => {
                f.debug_struct("Local").field("password_hash", &"[REDACTED]").finish()
            },
            Self::Federated { provider, subject_id } => f
                .debug_struct("Federated")
                .field("provider", provider)
                .field("subject_id", subject_id)
                .finish(),
        }
    }
}

/// A uniquely identified account.
///
/// Exactly one principal exists per case-insensitive email, and at most one
/// per `(provider, subject_id)` pair; the principal store enforces both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Store-assigned identifier.
    pub id: PrincipalId,
    /// Email address as first supplied.
    pub email: String,
    /// Human-readable name.
    pub display_name: String,
    /// Authentication origin.
    pub origin: Origin,
    /// Authority label, e.g. `ROLE_USER`.
    pub role: String,
}

impl Principal {
    /// Returns the principal with its password hash scrubbed.
    #[must_use]
    pub fn profile(&self) -> PrincipalProfile {
        PrincipalProfile {
            id: self.id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            origin: self.origin.label().to_owned(),
            role: self.role.clone(),
        }
    }

    /// Returns `true` if this principal is federated through exactly this
    /// provider identity.
    #[must_use]
    pub fn is_federated_as(&self, provider: &Provider, subject_id: &str) -> bool {
        self.origin.provider_identity() == Some((provider, subject_id))
    }
}

/// Caller-facing view of a [`Principal`], without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalProfile {
    /// Store-assigned identifier.
    pub id: PrincipalId,
    /// Email address.
    pub email: String,
    /// Human-readable name.
    pub display_name: String,
    /// `LOCAL` or the provider tag.
    pub origin: String,
    /// Authority label.
    pub role: String,
}

/// Input for [`PrincipalStore::create`](crate::auth::PrincipalStore::create).
#[derive(Debug, Clone, bon::Builder)]
pub struct NewPrincipal {
    /// Email address; must not be taken by another principal.
    #[builder(into)]
    pub email: String,
    /// Human-readable name.
    #[builder(into)]
    pub display_name: String,
    /// Authentication origin.
    pub origin: Origin,
    /// Authority label.
    #[builder(into, default = DEFAULT_ROLE.to_owned())]
    pub role: String,
}

/// Lowercased form of an email used for uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
