//! Refresh session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::types::PrincipalId;

/// The single refresh credential currently valid for a principal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    /// Owner of the session.
    pub principal_id: PrincipalId,
    /// The opaque refresh token, exactly as issued.
    pub token: Zeroizing<String>,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Creates a session record.
    #[must_use]
    pub fn new(
        principal_id: PrincipalId,
        token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self { principal_id, token: Zeroizing::new(token.into()), issued_at, expires_at }
    }

    /// Returns `true` once `now` has reached `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Returns `true` if the session has expired as of the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl std::fmt::Debug for RefreshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshSession")
            .field("principal_id", &self.principal_id)
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
