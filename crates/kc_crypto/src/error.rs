use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid keys for vault")]
    InvalidKeys,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key length")]
    InvalidPublicKey,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}
