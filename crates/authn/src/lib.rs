//! # Yeoladin Authentication
//!
//! Token issuance, session lifecycle, and federated identity mapping.
//!
//! This crate provides:
//! - **Credential signing**: HS512 access and refresh tokens ([`CredentialSigner`])
//! - **Identity reconciliation**: federated assertions to principals ([`IdentityReconciler`])
//! - **The gateway**: register, login, refresh, logout, and request authentication
//!   ([`AuthGateway`])
//!
//! Principals and refresh sessions persist through the stores in
//! `yeoladin-storage`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use yeoladin_authn::{AuthConfig, AuthGateway, LoginRequest};
//! use yeoladin_storage::{
//!     MemoryBackend,
//!     auth::{BackendPrincipalStore, BackendSessionStore},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let config = AuthConfig::builder().signing_secret(std::env::var("AUTH_SIGNING_SECRET")?).build()?;
//! let gateway = AuthGateway::new(
//!     config,
//!     Arc::new(BackendPrincipalStore::new(backend.clone())),
//!     Arc::new(BackendSessionStore::new(backend)),
//! )?;
//!
//! let session = gateway
//!     .login(LoginRequest::builder().identifier("alice@example.com").secret("pw".to_owned()).build())
//!     .await?;
//! let claims = gateway.authenticate(&session.access_token)?;
//! println!("authenticated {}", claims.subject);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Gateway configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Authentication flows.
pub mod gateway;
/// Token minting and verification.
pub mod jwt;
/// Secret hashing.
pub mod password;
/// Federated identity mapping.
pub mod reconciler;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm and key validation.
pub mod validation;

pub use config::{AuthConfig, PasswordHashingConfig, RefreshRotation};
pub use error::{AuthError, ConfigError, Result, TokenError};
pub use gateway::{
    AuthGateway, IssuedSession, LoginRequest, RefreshedTokens, RegistrationRequest, bearer_token,
};
pub use jwt::{AccessClaims, CredentialSigner, RefreshClaims, TokenUse};
pub use reconciler::{FederatedAssertion, IdentityReconciler};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
