//! Argon2 hashing for customer passwords and the destructive-action re-check

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use tracing::error;

use crate::errors::DomainError;

pub fn hash_password(password: &str) -> Result<String, DomainError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DomainError::Internal(format!("Failed to hash password: {}", e)))
}

/// Only Argon2 hashes are accepted; anything else fails verification.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    if !password_hash.starts_with("$argon2") {
        error!("Refusing to verify unsupported password hash format");
        return false;
    }

    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Failed to parse Argon2 hash: {}", e);
            false
        }
    }
}
