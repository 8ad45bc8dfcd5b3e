//! Minting and verification of access and refresh tokens.
//!
//! Both token kinds are compact JWTs signed with HS512 under one shared
//! secret. Verification needs no store lookup:
//!
//! 1. header parse and algorithm policy ([`validate_algorithm`])
//! 2. signature
//! 3. claims parse
//! 4. expiry, with zero leeway
//!
//! Because the signature is checked before expiry, a forged token is always
//! reported as [`TokenError::InvalidSignature`] and never as
//! [`TokenError::Expired`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use yeoladin_authn::jwt::CredentialSigner;
//!
//! let signer = CredentialSigner::new(&[42u8; 64]).unwrap();
//! let token = signer
//!     .mint_access("alice@example.com", &["ROLE_USER"], Duration::from_secs(3600))
//!     .unwrap();
//!
//! let claims = signer.verify_access(&token).unwrap();
//! assert_eq!(claims.subject, "alice@example.com");
//! assert_eq!(claims.authorities, vec!["ROLE_USER".to_owned()]);
//! ```

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, TokenError},
    validation::{validate_algorithm, validate_secret},
};

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Length of the random refresh token id before encoding.
const TOKEN_ID_BYTES: usize = 32;

/// Which flow a token was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    /// Short-lived request credential.
    Access,
    /// Long-lived credential exchanged for new access tokens.
    Refresh,
}

/// Claims carried on the wire.
///
/// ```json
/// {
///   "sub": "alice@example.com",
///   "auth": "ROLE_USER",
///   "typ": "access",
///   "iat": 1700000000,
///   "exp": 1700003600
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the principal's email.
    pub sub: String,
    /// Comma-joined authorities. Access tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Token kind.
    pub typ: TokenUse,
    /// Random token id. Refresh tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
}

/// A verified access token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessClaims {
    /// The principal's email.
    pub subject: String,
    /// Authority labels, e.g. `ROLE_USER`.
    pub authorities: Vec<String>,
    /// When the token was minted.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// A verified refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshClaims {
    /// The principal's email.
    pub subject: String,
    /// Random id making the token unique.
    pub token_id: String,
    /// When the token was minted.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies tokens with one HS512 secret.
///
/// The secret is turned into keys once at construction and never changes.
#[derive(Clone)]
pub struct CredentialSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for CredentialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSigner").field("algorithm", &ALGORITHM).finish_non_exhaustive()
    }
}

impl CredentialSigner {
    /// Creates a signer from a raw secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`](crate::validation::MIN_SECRET_LEN) bytes.
    pub fn new(secret: &[u8]) -> Result<Self, ConfigError> {
        validate_secret(secret)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Mints an access token issued now.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encoding`] if signing fails.
    pub fn mint_access<S: AsRef<str>>(
        &self,
        subject: &str,
        authorities: &[S],
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.mint_access_at(subject, authorities, Utc::now(), ttl)
    }

    /// Mints an access token with an explicit issue time.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encoding`] if `issued_at` precedes the epoch or
    /// signing fails.
    pub fn mint_access_at<S: AsRef<str>>(
        &self,
        subject: &str,
        authorities: &[S],
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let (iat, exp) = window(issued_at, ttl)?;
        let auth = authorities.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",");

        self.encode(&TokenClaims {
            sub: subject.to_owned(),
            auth: Some(auth),
            typ: TokenUse::Access,
            jti: None,
            iat,
            exp,
        })
    }

    /// Mints a refresh token issued now.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encoding`] if signing fails.
    pub fn mint_refresh(&self, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        self.mint_refresh_at(subject, Utc::now(), ttl)
    }

    /// Mints a refresh token with an explicit issue time.
    ///
    /// Every refresh token carries a fresh random `jti`, so two tokens minted
    /// for one subject within the same second still differ.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Encoding`] if `issued_at` precedes the epoch or
    /// signing fails.
    pub fn mint_refresh_at(
        &self,
        subject: &str,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let (iat, exp) = window(issued_at, ttl)?;

        let mut id = [0u8; TOKEN_ID_BYTES];
        rand::rng().fill(&mut id);

        self.encode(&TokenClaims {
            sub: subject.to_owned(),
            auth: None,
            typ: TokenUse::Refresh,
            jti: Some(URL_SAFE_NO_PAD.encode(id)),
            iat,
            exp,
        })
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(ALGORITHM), claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verifies a token of either kind and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`] if the token cannot be decoded
    /// - [`TokenError::UnsupportedAlgorithm`] if the header names anything but HS512
    /// - [`TokenError::InvalidSignature`] if the signature does not match
    /// - [`TokenError::Expired`] if the signature matches but `exp` has passed
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let header = decode_header(token)
            .map_err(|e| TokenError::malformed(format!("Failed to decode JWT header: {e}")))?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let claims = decode::<TokenClaims>(token, &self.decoding, &self.validation)?.claims;

        // The library accepts `exp == now`; a token is dead at its expiry instant.
        if claims.exp <= now_secs() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// Everything [`verify`](Self::verify) returns, plus
    /// [`TokenError::WrongUse`] for a refresh token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.typ != TokenUse::Access {
            return Err(TokenError::WrongUse);
        }

        let authorities = claims
            .auth
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|a| !a.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(AccessClaims {
            subject: claims.sub,
            authorities,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }

    /// Verifies a refresh token.
    ///
    /// # Errors
    ///
    /// Everything [`verify`](Self::verify) returns, plus
    /// [`TokenError::WrongUse`] for an access token and
    /// [`TokenError::Malformed`] if the token id is missing.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.typ != TokenUse::Refresh {
            return Err(TokenError::WrongUse);
        }

        let token_id = claims
            .jti
            .filter(|jti| !jti.is_empty())
            .ok_or_else(|| TokenError::malformed("missing claim: jti"))?;

        Ok(RefreshClaims {
            subject: claims.sub,
            token_id,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn window(issued_at: DateTime<Utc>, ttl: Duration) -> Result<(u64, u64), TokenError> {
    let iat = u64::try_from(issued_at.timestamp())
        .map_err(|_| TokenError::Encoding("issue time precedes the epoch".into()))?;
    let exp = iat
        .checked_add(ttl.as_secs())
        .ok_or_else(|| TokenError::Encoding("expiry overflows".into()))?;
    Ok((iat, exp))
}

fn timestamp(secs: u64) -> Result<DateTime<Utc>, TokenError> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| TokenError::malformed("timestamp out of range"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn signer() -> CredentialSigner {
        CredentialSigner::new(&[0x5a; 64]).unwrap()
    }

    fn other_signer() -> CredentialSigner {
        CredentialSigner::new(&[0xa5; 64]).unwrap()
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = CredentialSigner::new(b"too-short").unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "signing_secret", .. }));
    }

    #[test]
    fn test_debug_hides_key_material() {
        let rendered = format!("{:?}", signer());
        assert!(rendered.contains("HS512"));
        assert!(!rendered.contains("5a"));
    }

    #[test]
    fn test_access_round_trip() {
        let signer = signer();
        let issued = Utc::now();
        let token =
            signer.mint_access_at("alice@example.com", &["ROLE_USER", "ROLE_ADMIN"], issued, HOUR).unwrap();

        let claims = signer.verify_access(&token).unwrap();
        assert_eq!(claims.subject, "alice@example.com");
        assert_eq!(claims.authorities, vec!["ROLE_USER", "ROLE_ADMIN"]);
        assert_eq!(claims.issued_at.timestamp(), issued.timestamp());
        assert_eq!(claims.expires_at - claims.issued_at, TimeDelta::hours(1));
    }

    #[test]
    fn test_refresh_expiry_is_issue_plus_ttl() {
        let signer = signer();
        let ttl = Duration::from_secs(14 * 24 * 3600);
        let token = signer.mint_refresh("alice@example.com", ttl).unwrap();

        let raw = signer.verify(&token).unwrap();
        assert_eq!(raw.exp, raw.iat + ttl.as_secs());
        assert_eq!(raw.typ, TokenUse::Refresh);
        assert!(raw.auth.is_none());

        let claims = signer.verify_refresh(&token).unwrap();
        assert_eq!(claims.subject, "alice@example.com");
        assert_eq!(URL_SAFE_NO_PAD.decode(&claims.token_id).unwrap().len(), TOKEN_ID_BYTES);
    }

    #[test]
    fn test_refresh_tokens_are_unique_within_a_second() {
        let signer = signer();
        let issued = Utc::now();
        let a = signer.mint_refresh_at("alice@example.com", issued, HOUR).unwrap();
        let b = signer.mint_refresh_at("alice@example.com", issued, HOUR).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_with_valid_signature() {
        let signer = signer();
        let issued = Utc::now() - TimeDelta::hours(2);
        let token = signer.mint_access_at("alice@example.com", &["ROLE_USER"], issued, HOUR).unwrap();

        assert_eq!(signer.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_token_dead_at_expiry_instant() {
        let signer = signer();
        let issued = Utc::now() - TimeDelta::hours(1);
        let token = signer.mint_access_at("alice@example.com", &["ROLE_USER"], issued, HOUR).unwrap();

        assert_eq!(signer.verify(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_forged_token_is_never_reported_expired() {
        let issued = Utc::now() - TimeDelta::hours(2);
        let forged =
            other_signer().mint_access_at("alice@example.com", &["ROLE_USER"], issued, HOUR).unwrap();

        assert_eq!(signer().verify(&forged).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let signer = signer();
        let access = signer.mint_access("alice@example.com", &["ROLE_USER"], HOUR).unwrap();
        let refresh = signer.mint_refresh("alice@example.com", HOUR).unwrap();

        assert_eq!(signer.verify_refresh(&access).unwrap_err(), TokenError::WrongUse);
        assert_eq!(signer.verify_access(&refresh).unwrap_err(), TokenError::WrongUse);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = signer();
        let token = signer.mint_access("alice@example.com", &["ROLE_USER"], HOUR).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "sub": "mallory@example.com",
                "auth": "ROLE_ADMIN",
                "typ": "access",
                "iat": now_secs(),
                "exp": now_secs() + 3600,
            }))
            .unwrap(),
        );
        parts[1] = &forged_payload;

        assert_eq!(signer.verify(&parts.join(".")).unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn test_empty_authorities_round_trip() {
        let signer = signer();
        let token = signer.mint_access::<&str>("alice@example.com", &[], HOUR).unwrap();
        assert!(signer.verify_access(&token).unwrap().authorities.is_empty());
    }

    #[test]
    fn test_issue_time_before_epoch_rejected() {
        let before_epoch = DateTime::from_timestamp(-10, 0).unwrap();
        let err = signer().mint_refresh_at("alice@example.com", before_epoch, HOUR).unwrap_err();
        assert!(matches!(err, TokenError::Encoding(_)));
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn access_claims_survive_mint_and_verify(
                subject in "[a-z0-9._%+-]{1,32}@[a-z0-9-]{1,16}\\.[a-z]{2,6}",
                authorities in proptest::collection::vec("ROLE_[A-Z_]{1,16}", 0..5),
                ttl_secs in 60u64..(30 * 24 * 3600),
            ) {
                let signer = signer();
                let token = signer
                    .mint_access(&subject, &authorities, Duration::from_secs(ttl_secs))
                    .unwrap();

                let claims = signer.verify_access(&token).unwrap();
                prop_assert_eq!(claims.subject, subject);
                prop_assert_eq!(claims.authorities, authorities);
                prop_assert_eq!(
                    (claims.expires_at - claims.issued_at).num_seconds(),
                    i64::try_from(ttl_secs).unwrap()
                );
            }

            #[test]
            fn garbage_never_panics_or_verifies(token in ".{0,256}") {
                prop_assert!(signer().verify(&token).is_err());
            }
        }
    }

    /// Known-bad inputs must be rejected without panicking.
    mod malformed_inputs {
        use super::*;

        fn rejected_as_malformed(token: &str) -> bool {
            matches!(signer().verify(token), Err(TokenError::Malformed(_)))
        }

        #[test]
        fn empty_input() {
            assert!(rejected_as_malformed(""));
        }

        #[test]
        fn dots_only() {
            assert!(rejected_as_malformed("."));
            assert!(rejected_as_malformed(".."));
            assert!(rejected_as_malformed("..."));
        }

        #[test]
        fn plain_string() {
            assert!(rejected_as_malformed("not-a-jwt"));
        }

        #[test]
        fn invalid_base64_segments() {
            assert!(rejected_as_malformed("!!!.@@@.###"));
        }

        #[test]
        fn invalid_payload_json() {
            let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS512","typ":"JWT"}"#);
            let payload = URL_SAFE_NO_PAD.encode(b"not json");
            let token = format!("{header}.{payload}.sig");
            assert!(signer().verify(&token).is_err());
        }
    }
}
