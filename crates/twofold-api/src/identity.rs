//! Token issuing and verification, password hashing.

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use twofold_types::api::Claims;

use crate::error::ApiError;

pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Missing, malformed, badly signed and expired tokens all map to `Unauthorized`.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Ok(token_data.claims)
}

/// Argon2id with a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies() {
        let user_id = Uuid::new_v4();
        let token = issue_token(SECRET, user_id, "alice", chrono::Duration::days(1)).unwrap();
        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn wrong_secret_or_expired_is_unauthorized() {
        let user_id = Uuid::new_v4();
        let token = issue_token(SECRET, user_id, "alice", chrono::Duration::days(1)).unwrap();
        assert!(matches!(verify_token("other", &token), Err(ApiError::Unauthorized)));

        let expired = issue_token(SECRET, user_id, "alice", chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(verify_token(SECRET, &expired), Err(ApiError::Unauthorized)));

        assert!(matches!(verify_token(SECRET, "garbage"), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not a phc string"));
    }
}
