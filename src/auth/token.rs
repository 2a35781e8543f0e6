//! Access token signing, verification and hashing.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{auth::credentials::VerifiedIdentity, errors::AppError};

/// Fixed access token lifetime: 24 hours from issuance.
pub const TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Claims
///
/// Payload of every access token. `sub` is the identity id rendered as a string, as the
/// JWT registered claim requires. `jti` is the id of the session row the token is bound
/// to, which also keeps two logins within the same second from minting the same token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub jti: Uuid,
    pub username: String,
    pub role_id: i32,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(identity: &VerifiedIdentity, session_id: Uuid, issued_at: DateTime<Utc>) -> Self {
        let expires_at = issued_at + Duration::seconds(TOKEN_LIFETIME_SECS);
        Self {
            sub: identity.id.to_string(),
            jti: session_id,
            username: identity.username.clone(),
            role_id: identity.role_id,
            role: identity.role_name.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        }
    }

    pub fn identity_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }
}

pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, AppError> {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|e| AppError::Internal {
        operation: format!("sign token: {e}"),
    })
}

fn validation(check_expiry: bool) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = check_expiry;
    validation.leeway = 0;
    validation
}

fn decode_with(token: &str, secret: &str, validation: &Validation) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::ExpiredToken,
            kind => AppError::InvalidToken {
                reason: format!("{kind:?}"),
            },
        })
}

/// Verifies signature, structure and expiry.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode_with(token, secret, &validation(true))
}

/// Verifies signature and structure only. Used where an expired token still identifies
/// its holder (logout bookkeeping), never for authentication.
pub fn decode_token_ignoring_expiry(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode_with(token, secret, &validation(false))
}

/// SHA-256 hex digest stored in the session row instead of the token itself.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "token-unit-test-secret";

    fn identity() -> VerifiedIdentity {
        VerifiedIdentity {
            id: 7,
            username: "jperez".to_string(),
            role_id: 2,
            role_name: "instructor".to_string(),
        }
    }

    #[test]
    fn test_claims_expire_after_24_hours() {
        let now = Utc::now();
        let claims = Claims::new(&identity(), Uuid::new_v4(), now);
        assert_eq!(claims.exp - claims.iat, 86_400);
        assert_eq!(claims.identity_id(), Some(7));
    }

    #[test]
    fn test_signed_token_decodes() {
        let claims = Claims::new(&identity(), Uuid::new_v4(), Utc::now());
        let token = sign_token(&claims, SECRET).unwrap();
        assert_eq!(decode_token(&token, SECRET).unwrap(), claims);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = sign_token(&Claims::new(&identity(), Uuid::new_v4(), Utc::now()), SECRET).unwrap();
        assert!(matches!(
            decode_token(&token, "another-secret"),
            Err(AppError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            decode_token("not.a.jwt", SECRET),
            Err(AppError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_expired_token_is_expired_unless_ignored() {
        let issued = Utc::now() - Duration::hours(25);
        let claims = Claims::new(&identity(), Uuid::new_v4(), issued);
        let token = sign_token(&claims, SECRET).unwrap();

        assert!(matches!(
            decode_token(&token, SECRET),
            Err(AppError::ExpiredToken)
        ));
        assert_eq!(decode_token_ignoring_expiry(&token, SECRET).unwrap(), claims);
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        let hash = token_hash("abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, token_hash("abc"));
        assert_ne!(hash, token_hash("abd"));
    }
}
