use std::collections::BTreeMap;

use kc_crypto::CryptoError;
use sqlx::sqlite::SqliteQueryResult;
use thiserror::Error;

/// Field name -> reason, e.g. `secret_id: too short`.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid keys for vault")]
    InvalidKeys,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key length")]
    InvalidPublicKey,

    #[error("Invalid attributes: {}", describe_fields(.0))]
    InvalidAttributes(FieldErrors),

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Does not exist")]
    DoesntExist,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Already belongs to team")]
    AlreadyInTeam,

    #[error("Already invited")]
    AlreadyInvited,

    #[error("User does not belong to team")]
    NotInTeam,

    #[error("You cannot do that")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKeys => Self::InvalidKeys,
            CryptoError::InvalidSignature => Self::InvalidSignature,
            CryptoError::InvalidPublicKey => Self::InvalidPublicKey,
            CryptoError::PasswordHash(m) => Self::PasswordHash(m),
        }
    }
}

impl StoreError {
    /// Field errors, if this is `InvalidAttributes`.
    pub fn fields(&self) -> Option<&FieldErrors> {
        match self {
            Self::InvalidAttributes(f) => Some(f),
            _ => None,
        }
    }
}

fn describe_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Accumulates field errors; `finish` yields `InvalidAttributes` if any were set.
#[derive(Debug, Default)]
pub(crate) struct Fields(FieldErrors);

impl Fields {
    pub fn check(&mut self, ok: bool, field: &str, reason: &str) -> &mut Self {
        if !ok {
            self.0.insert(field.to_owned(), reason.to_owned());
        }
        self
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(StoreError::InvalidAttributes(std::mem::take(&mut self.0)))
        }
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Map a unique violation to `kind`, everything else to `Database`.
pub(crate) fn on_unique(kind: StoreError) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if is_unique_violation(&e) {
            kind
        } else {
            StoreError::Database(e)
        }
    }
}

/// Zero affected rows on a targeted update/delete is `DoesntExist`.
pub(crate) fn affected(res: SqliteQueryResult) -> Result<u64> {
    match res.rows_affected() {
        0 => Err(StoreError::DoesntExist),
        n => Ok(n),
    }
}
