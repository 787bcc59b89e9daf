//! Session token issuance and verification (HS256)
//!
//! The library's own `exp` check is disabled so that expiry is decided against
//! an explicit clock with zero leeway, after the signature has been checked.

use crate::core::error::{Result, RentError};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Identity id
    pub sub: String,
    pub email: String,
    /// `last_password_change` of the identity at issuance, unix ms
    pub ver: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds
    pub exp: i64,
}

impl SessionClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Token is malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    SignatureInvalid,
}

impl From<TokenError> for RentError {
    fn from(err: TokenError) -> Self {
        let message = match err {
            TokenError::Expired => "Session has expired, please log in again",
            TokenError::Malformed | TokenError::SignatureInvalid => "Invalid authentication token",
        };
        RentError::AuthenticationError(message.to_string())
    }
}

/// A freshly minted token with its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, identity_id: &str, email: &str, version: i64, now: DateTime<Utc>) -> Result<IssuedToken> {
        let iat = now.timestamp();
        let claims = SessionClaims {
            sub: identity_id.to_string(),
            email: email.to_string(),
            ver: version,
            iat,
            exp: iat.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| RentError::TokenError(format!("Failed to sign token: {}", e)))?;

        Ok(IssuedToken { token, claims })
    }

    /// Signature first, then expiry: a token is live while `now < exp`
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
                _ => TokenError::Malformed,
            }
        })?;

        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = service();
        let now = Utc::now();
        let issued = tokens.issue("user-1", "a@x.com", 42, now).unwrap();

        let claims = tokens.verify(&issued.token, now).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.ver, 42);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_ttl_boundary() {
        let tokens = service();
        let now = Utc::now();
        let issued = tokens.issue("user-1", "a@x.com", 1, now).unwrap();

        let just_before = now + chrono::Duration::seconds(3599);
        let at_expiry = now + chrono::Duration::seconds(3600);
        let after = now + chrono::Duration::seconds(3601);

        assert!(tokens.verify(&issued.token, just_before).is_ok());
        assert_eq!(tokens.verify(&issued.token, at_expiry), Err(TokenError::Expired));
        assert_eq!(tokens.verify(&issued.token, after), Err(TokenError::Expired));
    }

    #[test]
    fn test_oversized_ttl_saturates() {
        let tokens = TokenService::new("test-secret", Duration::from_secs(u64::MAX));
        let now = Utc::now();
        let issued = tokens.issue("user-1", "a@x.com", 1, now).unwrap();

        assert_eq!(issued.claims.exp, i64::MAX);
        assert!(issued.claims.exp > issued.claims.iat);
    }

    #[test]
    fn test_foreign_signature_is_rejected() {
        let now = Utc::now();
        let forged = TokenService::new("other-secret", Duration::from_secs(3600))
            .issue("user-1", "a@x.com", 1, now)
            .unwrap();

        assert_eq!(service().verify(&forged.token, now), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_forged_expired_token_reports_signature_first() {
        let issued_at = Utc::now() - chrono::Duration::hours(5);
        let forged = TokenService::new("other-secret", Duration::from_secs(60))
            .issue("user-1", "a@x.com", 1, issued_at)
            .unwrap();

        assert_eq!(service().verify(&forged.token, Utc::now()), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let now = Utc::now();
        assert_eq!(service().verify("not.a.token", now), Err(TokenError::Malformed));
        assert_eq!(service().verify("", now), Err(TokenError::Malformed));
    }

    #[test]
    fn test_token_errors_map_to_authentication() {
        let err: RentError = TokenError::Expired.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
