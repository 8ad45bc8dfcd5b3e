//! The authentication gateway: the one entry point other subsystems call.
//!
//! | Operation | Input | Output |
//! |-----------|-------|--------|
//! | [`register`](AuthGateway::register) | [`RegistrationRequest`] | [`PrincipalProfile`] |
//! | [`login`](AuthGateway::login) | [`LoginRequest`] | [`IssuedSession`] |
//! | [`federated_login`](AuthGateway::federated_login) | [`FederatedAssertion`] | [`IssuedSession`] |
//! | [`refresh`](AuthGateway::refresh) | refresh token | [`RefreshedTokens`] |
//! | [`logout`](AuthGateway::logout) | refresh token | `()` |
//! | [`authenticate`](AuthGateway::authenticate) | access token | [`AccessClaims`] |
//!
//! Every store call is bounded by the configured store timeout; an elapsed
//! bound surfaces as [`AuthError::StoreUnavailable`].

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use yeoladin_storage::{
    PrincipalId, StorageError, StorageResult,
    auth::{
        DEFAULT_ROLE, NewPrincipal, Origin, Principal, PrincipalProfile, PrincipalStore,
        RefreshSession, SessionStore, normalize_email,
    },
    with_timeout,
};
use zeroize::Zeroizing;

use crate::{
    config::{AuthConfig, RefreshRotation},
    error::{AuthError, ConfigError, Result},
    jwt::{AccessClaims, CredentialSigner},
    password::SecretHasher,
    reconciler::{FederatedAssertion, IdentityReconciler},
};

/// Local credentials presented at login.
#[derive(Clone, bon::Builder)]
pub struct LoginRequest {
    /// The principal's email.
    #[builder(into)]
    pub identifier: String,
    /// The plaintext secret.
    #[builder(into)]
    pub secret: Zeroizing<String>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A new local account.
#[derive(Clone, bon::Builder)]
pub struct RegistrationRequest {
    /// Email, unique across all principals.
    #[builder(into)]
    pub email: String,
    /// The plaintext secret to hash.
    #[builder(into)]
    pub secret: Zeroizing<String>,
    /// Name shown to users; defaults to the email.
    #[builder(into)]
    pub display_name: Option<String>,
    /// Authority label; defaults to `ROLE_USER`.
    #[builder(into)]
    pub role: Option<String>,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("secret", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .field("role", &self.role)
            .finish()
    }
}

/// Tokens issued by a successful login.
#[derive(Clone)]
pub struct IssuedSession {
    /// Short-lived request credential.
    pub access_token: String,
    /// Credential for [`AuthGateway::refresh`].
    pub refresh_token: String,
    /// The authenticated principal.
    pub principal: PrincipalProfile,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("principal", &self.principal)
            .finish()
    }
}

/// Tokens issued by a successful refresh.
#[derive(Clone)]
pub struct RefreshedTokens {
    /// A new access token.
    pub access_token: String,
    /// The replacement refresh token under [`RefreshRotation::Rotate`];
    /// `None` under [`RefreshRotation::Reuse`], where the presented token
    /// stays valid.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// ```
/// use yeoladin_authn::gateway::bearer_token;
///
/// assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
/// assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
/// assert_eq!(bearer_token("Bearer "), None);
/// ```
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|token| !token.is_empty())
}

/// Login, refresh, logout, and federated flows over the principal and
/// session stores.
///
/// Cheap to clone; clones share the signer, hasher, and stores.
#[derive(Clone)]
pub struct AuthGateway {
    config: Arc<AuthConfig>,
    signer: Arc<CredentialSigner>,
    hasher: Arc<SecretHasher>,
    principals: Arc<dyn PrincipalStore>,
    sessions: Arc<dyn SessionStore>,
    reconciler: IdentityReconciler,
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl AuthGateway {
    /// Creates a gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing secret or hashing parameters
    /// are unusable.
    pub fn new(
        config: AuthConfig,
        principals: Arc<dyn PrincipalStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> std::result::Result<Self, ConfigError> {
        let signer = CredentialSigner::new(config.signing_secret())?;
        let hasher = SecretHasher::new(config.password_hashing())?;
        let reconciler = IdentityReconciler::new(Arc::clone(&principals), config.store_timeout());

        Ok(Self {
            config: Arc::new(config),
            signer: Arc::new(signer),
            hasher: Arc::new(hasher),
            principals,
            sessions,
            reconciler,
        })
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Returns the credential signer.
    #[must_use]
    pub fn signer(&self) -> &CredentialSigner {
        &self.signer
    }

    async fn timed<T>(
        &self,
        operation: &str,
        future: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        with_timeout(self.config.store_timeout(), operation, future).await
    }

    /// Registers a local principal.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingIdentityAttribute`] for a blank email or secret
    /// - [`AuthError::EmailAlreadyRegistered`] if the email is taken
    /// - [`AuthError::StoreUnavailable`] if the store fails or times out
    #[tracing::instrument(skip_all)]
    pub async fn register(&self, request: RegistrationRequest) -> Result<PrincipalProfile> {
        let email = request.email.trim();
        if email.is_empty() {
            return Err(AuthError::missing_attribute("email"));
        }
        if request.secret.is_empty() {
            return Err(AuthError::missing_attribute("secret"));
        }

        let hasher = Arc::clone(&self.hasher);
        let secret = request.secret.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AuthError::internal_with_source("hashing task failed", e))??;

        let display_name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(email);
        let new = NewPrincipal::builder()
            .email(email)
            .display_name(display_name)
            .origin(Origin::local(hash))
            .role(request.role.clone().unwrap_or_else(|| DEFAULT_ROLE.to_owned()))
            .build();

        match self.timed("create_principal", self.principals.create(new)).await {
            Ok(principal) => {
                tracing::info!(principal_id = %principal.id, "local principal registered");
                Ok(principal.profile())
            },
            Err(StorageError::AlreadyExists { .. }) => Err(AuthError::EmailAlreadyRegistered),
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticates local credentials and issues a session.
    ///
    /// An unknown email, a federated principal, and a wrong secret all fail
    /// the same way and after the same hashing work.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] if the credentials do not match a local principal
    /// - [`AuthError::StoreUnavailable`] if the store fails or times out
    #[tracing::instrument(skip_all)]
    pub async fn login(&self, request: LoginRequest) -> Result<IssuedSession> {
        let principal = self
            .timed("find_by_email", self.principals.find_by_email(request.identifier.trim()))
            .await?;

        let stored_hash = match principal.as_ref().map(|p| &p.origin) {
            Some(Origin::Local { password_hash }) => Some(password_hash.clone()),
            _ => None,
        };

        if !self.check_secret(request.secret, stored_hash).await? {
            tracing::debug!("login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let principal = principal.ok_or(AuthError::InvalidCredentials)?;
        self.issue(principal).await
    }

    /// Verifies `secret` against `hash`, or against the dummy hash when
    /// there is nothing to verify against. Runs off the async workers.
    async fn check_secret(
        &self,
        secret: Zeroizing<String>,
        hash: Option<Zeroizing<String>>,
    ) -> Result<bool> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&secret, &hash),
            None => {
                hasher.verify_dummy(&secret);
                false
            },
        })
        .await
        .map_err(|e| AuthError::internal_with_source("verification task failed", e))
    }

    /// Resolves a federated assertion and issues a session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingIdentityAttribute`] if the assertion lacks an email, provider, or
    ///   subject id
    /// - [`AuthError::IdentityAlreadyLinked`] if the assertion would re-link the email's principal
    ///   onto a provider identity another principal holds
    /// - [`AuthError::StoreUnavailable`] if the store fails or times out
    #[tracing::instrument(skip_all, fields(provider = %assertion.provider))]
    pub async fn federated_login(&self, assertion: FederatedAssertion) -> Result<IssuedSession> {
        let principal = self.reconciler.resolve(&assertion).await?;
        self.issue(principal).await
    }

    /// Mints both tokens for `principal` and makes the refresh token its
    /// only session.
    async fn issue(&self, principal: Principal) -> Result<IssuedSession> {
        let now = whole_seconds(Utc::now());
        let authorities = [principal.role.as_str()];

        let access_token = self.signer.mint_access_at(
            &principal.email,
            &authorities,
            now,
            self.config.access_token_ttl(),
        )?;
        let refresh_token =
            self.signer.mint_refresh_at(&principal.email, now, self.config.refresh_token_ttl())?;

        let session = self.session(principal.id, &refresh_token, now)?;
        self.timed("put_session", self.sessions.put(session)).await?;

        tracing::debug!(principal_id = %principal.id, "session issued");
        Ok(IssuedSession { access_token, refresh_token, principal: principal.profile() })
    }

    fn session(
        &self,
        principal_id: PrincipalId,
        token: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<RefreshSession> {
        let ttl = chrono::Duration::from_std(self.config.refresh_token_ttl())
            .map_err(|e| AuthError::internal_with_source("refresh token ttl out of range", e))?;
        Ok(RefreshSession::new(principal_id, token, issued_at, issued_at + ttl))
    }

    /// Exchanges a refresh token for a new access token, and under
    /// [`RefreshRotation::Rotate`] a new refresh token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingToken`] if no token is presented
    /// - [`AuthError::InvalidRefreshToken`] if the token is forged, expired, superseded, unknown,
    ///   or lost a concurrent rotation
    /// - [`AuthError::StoreUnavailable`] if the store fails or times out
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<RefreshedTokens> {
        let token = present(refresh_token)?;

        let claims = match self.signer.verify_refresh(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(reason = %e, "refresh token rejected");
                self.timed("delete_by_token", self.sessions.delete_by_token(token)).await?;
                return Err(AuthError::InvalidRefreshToken);
            },
        };

        let Some(session) =
            self.timed("find_by_token", self.sessions.find_by_token(token)).await?
        else {
            tracing::warn!("refresh token is not a current session");
            return Err(AuthError::InvalidRefreshToken);
        };

        let principal = self
            .timed("find_by_id", self.principals.find_by_id(session.principal_id))
            .await?
            .filter(|p| normalize_email(&p.email) == normalize_email(&claims.subject));
        let Some(principal) = principal else {
            tracing::warn!(
                principal_id = %session.principal_id,
                "refresh token subject does not match a principal",
            );
            self.timed("delete_by_token", self.sessions.delete_by_token(token)).await?;
            return Err(AuthError::InvalidRefreshToken);
        };

        let now = whole_seconds(Utc::now());
        let authorities = [principal.role.as_str()];
        let access_token = self.signer.mint_access_at(
            &principal.email,
            &authorities,
            now,
            self.config.access_token_ttl(),
        )?;

        match self.config.refresh_rotation() {
            RefreshRotation::Reuse => Ok(RefreshedTokens { access_token, refresh_token: None }),
            RefreshRotation::Rotate => {
                let next_token = self.signer.mint_refresh_at(
                    &principal.email,
                    now,
                    self.config.refresh_token_ttl(),
                )?;
                let next = self.session(principal.id, &next_token, now)?;

                let rotated = self.timed("rotate", self.sessions.rotate(token, next)).await?;
                if !rotated {
                    tracing::warn!(
                        principal_id = %principal.id,
                        "refresh token superseded by a concurrent refresh",
                    );
                    return Err(AuthError::InvalidRefreshToken);
                }

                tracing::debug!(principal_id = %principal.id, "refresh token rotated");
                Ok(RefreshedTokens { access_token, refresh_token: Some(next_token) })
            },
        }
    }

    /// Ends the session holding `refresh_token`, if any.
    ///
    /// # Errors
    ///
    /// [`AuthError::StoreUnavailable`] if the store fails or times out.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<()> {
        if let Ok(token) = present(refresh_token) {
            self.timed("delete_by_token", self.sessions.delete_by_token(token)).await?;
            tracing::debug!("session ended");
        }
        Ok(())
    }

    /// Ends whatever session `principal_id` holds.
    ///
    /// # Errors
    ///
    /// [`AuthError::StoreUnavailable`] if the store fails or times out.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, principal_id: PrincipalId) -> Result<()> {
        self.timed("delete_by_principal", self.sessions.delete_by_principal(principal_id)).await?;
        tracing::debug!("session revoked");
        Ok(())
    }

    /// Verifies an access token for an incoming request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingToken`] if the token is blank
    /// - [`AuthError::InvalidAccessToken`] on any verification failure
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims> {
        let token = present(Some(access_token))?;
        self.signer.verify_access(token).map_err(|e| {
            tracing::debug!(reason = %e, "access token rejected");
            AuthError::InvalidAccessToken
        })
    }
}

fn present(token: Option<&str>) -> Result<&str> {
    token.map(str::trim).filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)
}

/// Drops sub-second precision, matching the resolution of token timestamps.
fn whole_seconds(now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}
