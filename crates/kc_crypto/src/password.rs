//! Argon2id password hashing.
//!
//! Hashes are PHC strings (`$argon2id$v=19$...`) so parameters travel with
//! the hash. The salt is supplied by the caller, which lets the store draw it
//! from its injected entropy source.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::CryptoError;

pub const SALT_SIZE: usize = 16;

/// Hash `password` with Argon2id default parameters.
pub fn hash_password(password: &str, salt: &[u8; SALT_SIZE]) -> Result<String, CryptoError> {
    let salt =
        SaltString::encode_b64(salt).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// `true` iff `password` matches the PHC string. A malformed hash never matches.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
