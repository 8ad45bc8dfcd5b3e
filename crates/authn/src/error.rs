//! Authentication error types.
//!
//! [`AuthError`] is the vocabulary callers of the gateway see. [`TokenError`]
//! describes why a token failed verification and stays inside the crate's
//! flows: the gateway folds every token failure into
//! [`AuthError::InvalidRefreshToken`] or [`AuthError::InvalidAccessToken`].

use thiserror::Error;
use yeoladin_storage::{BoxError, StorageError};

/// Token minting and verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenError {
    /// The token cannot be decoded or is missing required claims.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm this signer does not accept.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The signature does not match the payload.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The signature is valid but the token is past its expiry.
    #[error("Token expired")]
    Expired,

    /// An access token was presented where a refresh token is required, or
    /// the reverse.
    #[error("Token used for the wrong purpose")]
    WrongUse,

    /// Minting failed.
    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

impl TokenError {
    /// Creates a [`TokenError::Malformed`].
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates a [`TokenError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidAlgorithm => {
                TokenError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::MissingRequiredClaim(claim) => {
                TokenError::malformed(format!("missing claim: {claim}"))
            },
            ErrorKind::InvalidToken => TokenError::malformed("Invalid JWT structure"),
            _ => TokenError::malformed(format!("JWT error: {err}")),
        }
    }
}

/// Errors returned by the authentication gateway and identity reconciler.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Unknown identifier, wrong secret, or an account that cannot log in
    /// with a password. The cases are indistinguishable on purpose.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The refresh token is forged, expired, superseded, or unknown.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// The access token failed verification.
    #[error("Invalid access token")]
    InvalidAccessToken,

    /// No token was presented.
    #[error("Missing token")]
    MissingToken,

    /// A required identity attribute is absent.
    #[error("Missing identity attribute: {attribute}")]
    MissingIdentityAttribute {
        /// Name of the missing attribute, e.g. `email`.
        attribute: &'static str,
    },

    /// Registration for an email that already belongs to a principal.
    #[error("Email already registered")]
    EmailAlreadyRegistered,

    /// A federated login would re-link a principal onto a provider identity
    /// that already belongs to a different principal. Nothing is changed.
    #[error("Provider identity already linked to another account: {provider}")]
    IdentityAlreadyLinked {
        /// Provider tag of the contested identity, e.g. `GOOGLE`.
        provider: String,
    },

    /// The backing store failed or did not answer in time. Retryable.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// An unexpected failure, such as a corrupt record.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthError {
    /// Creates an [`AuthError::MissingIdentityAttribute`].
    #[must_use]
    pub fn missing_attribute(attribute: &'static str) -> Self {
        Self::MissingIdentityAttribute { attribute }
    }

    /// Creates an [`AuthError::Internal`] without a source.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates an [`AuthError::Internal`] wrapping `source`.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(std::sync::Arc::new(source)) }
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            AuthError::StoreUnavailable(err)
        } else {
            AuthError::internal_with_source("storage operation failed", err)
        }
    }
}

/// Minting failures are internal; verification failures are mapped by the
/// caller, which knows which token kind was presented.
impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::internal_with_source("token operation failed", err)
    }
}

/// Errors in [`AuthConfig`](crate::config::AuthConfig) or signer construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric setting is below its floor.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Value supplied.
        value: String,
    },

    /// A setting is inconsistent or unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, AuthError>;
