use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ACCESS_COOKIE_NAME: &str = "accessToken";
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing identity token")]
    Unauthenticated,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Access token claims. The identity is carried in full so verification
/// never needs a store round-trip.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i64,
    pub jti: String,
    pub exp: usize,
    pub iat: usize,
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub email: String,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn now_secs() -> usize {
    chrono::Utc::now().timestamp() as usize
}

pub fn create_access_token(
    identity: &Identity,
    secret: &str,
    expiry_secs: u64,
) -> Result<String, AuthError> {
    let now = now_secs();
    let claims = Claims {
        sub: identity.id,
        username: identity.username.clone(),
        email: identity.email.clone(),
        iat: now,
        exp: now + expiry_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn create_refresh_token(user_id: i64, secret: &str, expiry_secs: u64) -> Result<String, AuthError> {
    let now = now_secs();
    let claims = RefreshClaims {
        sub: user_id,
        jti: uuid::Uuid::new_v4().simple().to_string(),
        iat: now,
        exp: now + expiry_secs as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn validate_access_token(token: &str, secret: &str) -> Result<Identity, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| Identity {
        id: data.claims.sub,
        username: data.claims.username,
        email: data.claims.email,
    })
    .map_err(|_| AuthError::InvalidToken)
}

pub fn validate_refresh_token(token: &str, secret: &str) -> Result<RefreshClaims, AuthError> {
    decode::<RefreshClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

/// Refresh tokens are stored as their SHA-256 digest, never in the clear.
pub fn refresh_token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Value of `name` inside a raw `Cookie` header.
pub fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name && !value.is_empty()).then_some(value)
    })
}

/// Resolve the caller from the `Cookie` header of an HTTP request or a
/// socket handshake.
pub fn verify_identity(cookie_header: Option<&str>, secret: &str) -> Result<Identity, AuthError> {
    let token = cookie_header
        .and_then(|raw| cookie_value(raw, ACCESS_COOKIE_NAME))
        .ok_or(AuthError::Unauthenticated)?;
    validate_access_token(token, secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            id: 7,
            username: "alice".into(),
            email: "alice@example.com".into(),
        }
    }

    #[test]
    fn access_token_carries_the_full_identity() {
        let token = create_access_token(&alice(), "secret", 60).unwrap();
        let header = format!("theme=dark; {ACCESS_COOKIE_NAME}={token}");
        assert_eq!(verify_identity(Some(&header), "secret").unwrap(), alice());
    }

    #[test]
    fn missing_cookie_is_unauthenticated_and_bad_signature_is_invalid() {
        assert!(matches!(
            verify_identity(None, "secret"),
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(
            verify_identity(Some("theme=dark"), "secret"),
            Err(AuthError::Unauthenticated)
        ));

        let token = create_access_token(&alice(), "other-secret", 60).unwrap();
        let header = format!("{ACCESS_COOKIE_NAME}={token}");
        assert!(matches!(
            verify_identity(Some(&header), "secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_invalid() {
        let now = now_secs();
        let claims = Claims {
            sub: 7,
            username: "alice".into(),
            email: "alice@example.com".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(matches!(
            validate_access_token(&token, "secret"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn refresh_tokens_rotate() {
        let a = create_refresh_token(7, "r", 60).unwrap();
        let b = create_refresh_token(7, "r", 60).unwrap();
        assert_ne!(a, b);
        assert_eq!(validate_refresh_token(&a, "r").unwrap().sub, 7);
        assert!(validate_refresh_token(&a, "access-secret").is_err());
        assert_eq!(refresh_token_digest(&a).len(), 64);
        assert_ne!(refresh_token_digest(&a), refresh_token_digest(&b));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
