//! JWT session tokens and password-reset grants.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    api::models::users::CurrentUser,
    config::Config,
    errors::Error,
    types::UserId,
};

/// Purpose claim carried by password-reset grants
pub const PASSWORD_RESET_PURPOSE: &str = "password_reset";

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,      // Subject (user ID)
    pub email: String,    // User email
    pub username: String, // Username
    pub exp: i64,         // Expiration time
    pub iat: i64,         // Issued at
}

impl SessionClaims {
    /// Create new session claims for a user
    pub fn new(user: &CurrentUser, config: &Config) -> Self {
        let now = Utc::now();
        let exp = now + config.auth.security.jwt_expiry;

        Self {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<SessionClaims> for CurrentUser {
    fn from(claims: SessionClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            username: claims.username,
        }
    }
}

/// Grant proving the holder just validated an OTP for `email`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetGrantClaims {
    pub sub: UserId,
    pub email: String,
    pub purpose: String,
    pub exp: i64,
    pub iat: i64,
}

fn secret(config: &Config) -> Result<&[u8], Error> {
    config
        .secret_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "JWT sessions: secret_key is required".to_string(),
        })
}

fn sign<T: Serialize>(claims: &T, config: &Config) -> Result<String, Error> {
    let key = EncodingKey::from_secret(secret(config)?);
    encode(&Header::default(), claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Decode with HS256 and `exp` validation. Client-side defects become `on_invalid`.
fn verify<T: DeserializeOwned>(token: &str, config: &Config, on_invalid: impl Fn() -> Error) -> Result<T, Error> {
    let key = DecodingKey::from_secret(secret(config)?);
    let validation = Validation::default();

    let token_data = decode::<T>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => on_invalid(),

        // Server errors - key issues, internal failures
        jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
        | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
        | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
        | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
        | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
        | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        // Catch-all for any future error variants (default to server error for safety)
        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    Ok(token_data.claims)
}

/// Create a JWT token for a user session
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    sign(&SessionClaims::new(user, config), config)
}

/// Verify and decode a JWT session token
pub fn verify_session_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    let claims: SessionClaims = verify(token, config, || Error::Unauthenticated { message: None })?;
    Ok(CurrentUser::from(claims))
}

pub fn create_reset_grant(user_id: UserId, email: &str, config: &Config) -> Result<String, Error> {
    let now = Utc::now();
    let claims = ResetGrantClaims {
        sub: user_id,
        email: email.to_string(),
        purpose: PASSWORD_RESET_PURPOSE.to_string(),
        exp: (now + config.auth.security.reset_grant_expiry).timestamp(),
        iat: now.timestamp(),
    };
    sign(&claims, config)
}

/// Verify a reset grant. Session tokens are refused even though they share the key.
pub fn verify_reset_grant(token: &str, config: &Config) -> Result<ResetGrantClaims, Error> {
    let invalid = || Error::InvalidToken {
        message: "Invalid or expired reset token".to_string(),
    };
    let claims: ResetGrantClaims = verify(token, config, invalid)?;
    if claims.purpose != PASSWORD_RESET_PURPOSE {
        return Err(invalid());
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use uuid::Uuid;

    fn create_test_user() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            username: "testuser".to_string(),
        }
    }

    #[test]
    fn test_create_and_verify_session_token() {
        let config = create_test_config();
        let user = create_test_user();

        let token = create_session_token(&user, &config).unwrap();
        let verified_user = verify_session_token(&token, &config).unwrap();

        assert_eq!(verified_user.id, user.id);
        assert_eq!(verified_user.email, user.email);
        assert_eq!(verified_user.username, user.username);
    }

    #[test]
    fn test_verify_token_wrong_secret() {
        let mut config = create_test_config();
        let token = create_session_token(&create_test_user(), &config).unwrap();

        config.secret_key = Some("different-secret".to_string());
        let result = verify_session_token(&token, &config);
        // Should be Unauthenticated (InvalidSignature), not Internal error
        assert!(matches!(result.unwrap_err(), Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_verify_expired_token() {
        let config = create_test_config();
        let user = create_test_user();

        let now = Utc::now();
        let claims = SessionClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            exp: (now - chrono::Duration::seconds(3600)).timestamp(), // 1 hour ago
            iat: now.timestamp(),
        };
        let token = sign(&claims, &config).unwrap();

        let result = verify_session_token(&token, &config);
        assert!(matches!(result.unwrap_err(), Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_verify_malformed_token() {
        let config = create_test_config();

        for token in ["not.a.token", "invalid", "", "too.many.parts.in.this.token"] {
            let result = verify_session_token(token, &config);
            assert!(
                matches!(result.unwrap_err(), Error::Unauthenticated { .. }),
                "Expected Unauthenticated error for token: {}",
                token
            );
        }
    }

    #[test]
    fn test_reset_grant_round_trip() {
        let config = create_test_config();
        let id = Uuid::new_v4();
        let grant = create_reset_grant(id, "test@example.com", &config).unwrap();
        let claims = verify_reset_grant(&grant, &config).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "test@example.com");
    }

    #[test]
    fn test_session_token_is_not_a_reset_grant() {
        let config = create_test_config();
        let session = create_session_token(&create_test_user(), &config).unwrap();
        assert!(matches!(
            verify_reset_grant(&session, &config).unwrap_err(),
            Error::InvalidToken { .. }
        ));
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let mut config = create_test_config();
        config.secret_key = None;
        assert!(matches!(
            create_session_token(&create_test_user(), &config).unwrap_err(),
            Error::Internal { .. }
        ));
    }
}
