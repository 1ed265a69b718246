//! Row models. These map to/from SQL rows and are what the store hands out.
//!
//! Serialized forms are what a client sees: sealed keys and password hashes
//! are never serialized, byte fields travel as base64.

use chrono::{DateTime, Utc};
use kc_crypto::encoding::b64;
use serde::Serialize;

pub const DEFAULT_VAULT_NAME: &str = "Generic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    #[serde(skip)]
    pub email: String,
    #[serde(skip)]
    pub unconfirmed_email: String,
    #[serde(skip)]
    pub hash_pass: String,
    #[serde(rename = "fullname")]
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    pub sign_in_count: i64,
    pub failed_attempts: i64,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    /// Client-sealed private pack. Opaque.
    #[serde(skip)]
    pub private_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(rename = "owner")]
    pub owner_id: String,
    #[serde(rename = "primary")]
    pub is_primary: bool,
    /// Member count at read time.
    #[serde(skip)]
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list for `Team` reads; `size` is computed, not stored.
pub(crate) const TEAM_COLUMNS: &str = "t.id, t.name, t.owner_id, t.is_primary, \
    (SELECT COUNT(*) FROM team_users c WHERE c.team_id = t.id) AS size, \
    t.created_at, t.updated_at";

/// Affiliation of a user with a team. Absence means "not a member".
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TeamUser {
    pub team_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub access_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TeamUserFull {
    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(rename = "admin")]
    pub is_admin: bool,
    #[serde(rename = "fullname")]
    pub full_name: String,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Vault {
    #[serde(skip)]
    pub team_id: String,
    pub id: String,
    pub version: i64,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A vault as seen by one member: its own sealed key plus the member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct VaultFull {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub vault: Vault,
    #[sqlx(rename = "sealed_key")]
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[sqlx(skip)]
    pub users: Vec<String>,
}

/// One revision of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Secret {
    #[serde(skip)]
    pub team_id: String,
    #[serde(rename = "vault")]
    pub vault_id: String,
    pub id: String,
    pub version: i64,
    pub vault_version: i64,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Invite {
    #[serde(rename = "team")]
    pub team_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Verification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_type: TokenType,
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of adding someone to a team by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invitation {
    /// A registered user was added to the team.
    Added(User),
    /// Nobody has that email yet; an invite is now outstanding.
    Invited(Invite),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn user_json_never_carries_secrets() {
        let u = User {
            id: "alice".into(),
            email: "alice@example.com".into(),
            unconfirmed_email: "".into(),
            hash_pass: "$argon2id$...".into(),
            full_name: "Alice".into(),
            confirmed_at: None,
            locked_at: None,
            sign_in_count: 0,
            failed_attempts: 0,
            public_key: vec![1, 2, 3],
            private_key: vec![9; 200],
            created_at: ts(),
            updated_at: ts(),
        };
        let v = serde_json::to_value(&u).unwrap();
        let obj = v.as_object().unwrap();
        for hidden in ["email", "unconfirmed_email", "hash_pass", "private_key"] {
            assert!(!obj.contains_key(hidden), "{hidden} leaked");
        }
        assert_eq!(v["fullname"], json!("Alice"));
        assert_eq!(v["public_key"], json!("AQID"));
    }

    #[test]
    fn secret_json_shape() {
        let s = Secret {
            team_id: "t".into(),
            vault_id: "Generic".into(),
            id: "abcdefghijklmnop".into(),
            version: 3,
            vault_version: 7,
            data: vec![0xff; 3],
            created_at: ts(),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["vault"], json!("Generic"));
        assert_eq!(v["version"], json!(3));
        assert_eq!(v["vault_version"], json!(7));
        assert_eq!(v["data"], json!("////"));
        assert!(v.get("team_id").is_none());
    }
}
