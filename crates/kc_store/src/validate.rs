//! Attribute checks run before every insert/update.

use std::sync::OnceLock;

use kc_crypto::pack::{PUBLIC_KEY_PACK_SIZE, SEALED_KEY_PACK_MIN_SIZE};
use regex::Regex;

use crate::error::{Fields, Result};
use crate::models::{Secret, Team, User};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_SECRET_ID_LEN: usize = 10;
pub const MIN_SECRET_DATA_LEN: usize = 32;

fn re_match(cell: &'static OnceLock<Option<Regex>>, pattern: &str, s: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

pub fn is_valid_username(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    re_match(&RE, r"^[A-Za-z0-9_-]{3,}$", s)
}

pub fn is_valid_email(s: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    re_match(&RE, r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*\.?@[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*\.[A-Za-z0-9_]+$", s)
}

/// `password` is checked here because only its hash reaches the row.
pub(crate) fn user(u: &User, password: &str) -> Result<()> {
    Fields::default()
        .check(is_valid_username(&u.id), "user_id", "invalid")
        .check(!u.full_name.is_empty(), "user_fullname", "invalid")
        .check(password.len() >= MIN_PASSWORD_LEN, "user_password", "too short")
        .check(is_valid_email(&u.email), "user_email", "invalid")
        .check(u.public_key.len() == PUBLIC_KEY_PACK_SIZE, "user_public_key", "invalid")
        .check(u.private_key.len() >= SEALED_KEY_PACK_MIN_SIZE, "user_private_key", "invalid")
        .finish()
}

pub(crate) fn team(t: &Team) -> Result<()> {
    Fields::default()
        .check(is_valid_username(&t.owner_id), "team_owner", "invalid")
        .check(!t.name.is_empty(), "team_name", "invalid")
        .finish()
}

pub(crate) fn vault_name(name: &str) -> Result<()> {
    Fields::default()
        .check(!name.trim().is_empty(), "vault_id", "missing")
        .finish()
}

pub(crate) fn sealed_key(user_id: &str, key: &[u8]) -> Result<()> {
    Fields::default()
        .check(!user_id.is_empty(), "vault_user", "missing")
        .check(key.len() >= SEALED_KEY_PACK_MIN_SIZE, "vault_key", "too short")
        .finish()
}

pub(crate) fn secret(s: &Secret) -> Result<()> {
    Fields::default()
        .check(s.id.len() >= MIN_SECRET_ID_LEN, "secret_id", "too short")
        .check(!s.team_id.is_empty(), "secret_team", "missing")
        .check(!s.vault_id.is_empty(), "secret_vault", "missing")
        .check(s.data.len() >= MIN_SECRET_DATA_LEN, "secret_data", "too short")
        .check(s.version != 0, "secret_version", "missing")
        .check(s.vault_version != 0, "secret_vault_version", "missing")
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn usernames() {
        for ok in ["abc", "alice", "a_b-c", "Bob99"] {
            assert!(is_valid_username(ok), "{ok}");
        }
        for bad in ["", "ab", "al ice", "al.ice", "bob@x", "ñandu"] {
            assert!(!is_valid_username(bad), "{bad}");
        }
    }

    #[test]
    fn emails() {
        for ok in ["bob@x.com", "a.b-c@mail.example.org", "x_y@h-1.io"] {
            assert!(is_valid_email(ok), "{ok}");
        }
        for bad in ["", "bob", "bob@", "@x.com", "bob@x", "bob@@x.com", "bo b@x.com", ".bob@x.com"] {
            assert!(!is_valid_email(bad), "{bad}");
        }
    }

    #[test]
    fn secret_attributes_are_reported_per_field() {
        let s = Secret {
            team_id: String::new(),
            vault_id: "v".into(),
            id: "short".into(),
            version: 0,
            vault_version: 1,
            data: vec![0; 10],
            created_at: Utc::now(),
        };
        let err = secret(&s).unwrap_err();
        let f = err.fields().unwrap();
        assert_eq!(f["secret_id"], "too short");
        assert_eq!(f["secret_team"], "missing");
        assert_eq!(f["secret_data"], "too short");
        assert_eq!(f["secret_version"], "missing");
        assert!(!f.contains_key("secret_vault"));
        assert!(!f.contains_key("secret_vault_version"));
    }
}
