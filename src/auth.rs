//! Session credentials: HS256-signed bearer tokens carrying a room-scoped
//! identity claim.
//!
//! The HTTP layer mints a token at room-create/join time; the WebSocket
//! layer only ever verifies. Trust is delegated entirely to the signature,
//! so verification never touches a store. Note this also means an admin
//! flag cannot be revoked mid-session without reissuing the token.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{IdentityClaim, RoomId, UserId};

/// Validity window for minted tokens.
pub const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AuthError {
    #[error("authentication token is missing")]
    Missing,
    #[error("invalid authentication token")]
    Invalid,
    #[error("authentication token has expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    sub: UserId,
    room: RoomId,
    admin: bool,
    exp: i64,
}

/// Process-wide signing configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    secret: String,
}

impl AuthConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Load the signing secret from `PARLOR_JWT_SECRET`, falling back to a
    /// development default.
    pub fn from_env() -> Self {
        match std::env::var("PARLOR_JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => Self::new(secret),
            _ => {
                tracing::warn!(
                    "PARLOR_JWT_SECRET not set - using development secret, tokens are forgeable!"
                );
                Self::new("dev-secret-key")
            }
        }
    }

    /// Mint a signed token embedding the claim, valid for `ttl`.
    pub fn issue(&self, claim: &IdentityClaim, ttl: Duration) -> Result<String, AuthError> {
        let claims = TokenClaims {
            sub: claim.user_id.clone(),
            room: claim.room_id.clone(),
            admin: claim.is_admin,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|_| AuthError::Invalid)
    }

    /// Validate a bearer credential and return the embedded claim verbatim.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<IdentityClaim, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid,
        })?;

        Ok(IdentityClaim {
            user_id: data.claims.sub,
            room_id: data.claims.room,
            is_admin: data.claims.admin,
        })
    }
}

/// Extract a `Bearer` credential from an Authorization header value.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn claim() -> IdentityClaim {
        IdentityClaim {
            user_id: "u1".to_string(),
            room_id: "r1".to_string(),
            is_admin: true,
        }
    }

    #[test]
    fn test_issue_then_authenticate_roundtrip() {
        let config = AuthConfig::new("test-secret");
        let token = config.issue(&claim(), Duration::days(7)).unwrap();

        let verified = config.authenticate(Some(&token)).unwrap();
        assert_eq!(verified, claim());
    }

    #[test]
    fn test_missing_credential() {
        let config = AuthConfig::new("test-secret");
        assert_eq!(config.authenticate(None), Err(AuthError::Missing));
        assert_eq!(config.authenticate(Some("")), Err(AuthError::Missing));
        assert_eq!(config.authenticate(Some("   ")), Err(AuthError::Missing));
    }

    #[test]
    fn test_garbage_credential_is_invalid() {
        let config = AuthConfig::new("test-secret");
        assert_eq!(
            config.authenticate(Some("not-a-token")),
            Err(AuthError::Invalid)
        );
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let config = AuthConfig::new("test-secret");
        let token = config.issue(&claim(), Duration::days(7)).unwrap();

        let other = AuthConfig::new("other-secret");
        assert_eq!(other.authenticate(Some(&token)), Err(AuthError::Invalid));
    }

    #[test]
    fn test_expired_credential() {
        let config = AuthConfig::new("test-secret");
        // Past the default validation leeway
        let token = config.issue(&claim(), Duration::minutes(-5)).unwrap();
        assert_eq!(config.authenticate(Some(&token)), Err(AuthError::Expired));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = axum::http::HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc.def.ghi".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz".parse().unwrap(),
        );
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_to_dev_secret() {
        std::env::remove_var("PARLOR_JWT_SECRET");
        let config = AuthConfig::from_env();
        let token = config.issue(&claim(), Duration::days(1)).unwrap();
        assert!(AuthConfig::new("dev-secret-key")
            .authenticate(Some(&token))
            .is_ok());

        std::env::set_var("PARLOR_JWT_SECRET", "from-env");
        let config = AuthConfig::from_env();
        let token = config.issue(&claim(), Duration::days(1)).unwrap();
        assert!(AuthConfig::new("from-env").authenticate(Some(&token)).is_ok());
        std::env::remove_var("PARLOR_JWT_SECRET");
    }
}
