//! Secrets: versioned, signed, opaque blobs inside a vault.
//!
//! Every mutation bumps the owning vault's version in the same transaction
//! and stamps it on the revision it writes. Revisions are never rewritten in
//! place; an update appends `version + 1`.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::context::SECRET_ID_LEN;
use crate::db::Store;
use crate::error::{affected, is_unique_violation, on_unique, Result, StoreError};
use crate::models::{Secret, Team, User, Vault};
use crate::validate;
use crate::vault::{fetch_vault, has_access, touch};

/// Attempts at a fresh random id before giving up with `AlreadyExists`.
pub const ID_ATTEMPTS: usize = 3;

const SECRET_COLUMNS: &str = "s.team_id, s.vault_id, s.id, s.version, s.vault_version, s.data, s.created_at";

/// Only the newest revision of each secret.
const LATEST_ONLY: &str = "s.version = (SELECT MAX(m.version) FROM secrets m \
    WHERE m.team_id = s.team_id AND m.vault_id = s.vault_id AND m.id = s.id)";

async fn insert_revision(conn: &mut SqliteConnection, s: &Secret) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO secrets (team_id, vault_id, id, version, vault_version, data, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&s.team_id)
    .bind(&s.vault_id)
    .bind(&s.id)
    .bind(s.version)
    .bind(s.vault_version)
    .bind(&s.data)
    .bind(s.created_at)
    .execute(&mut *conn)
    .await
    .map(|_| ())
}

async fn latest_version(conn: &mut SqliteConnection, team_id: &str, vault_id: &str, id: &str) -> Result<Option<i64>> {
    let (v,): (Option<i64>,) = sqlx::query_as(
        "SELECT MAX(version) FROM secrets WHERE team_id = ? AND vault_id = ? AND id = ?",
    )
    .bind(team_id)
    .bind(vault_id)
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(v)
}

async fn fetch_latest(conn: &mut SqliteConnection, team_id: &str, vault_id: &str, id: &str) -> Result<Secret> {
    sqlx::query_as::<_, Secret>(&format!(
        "SELECT {SECRET_COLUMNS} FROM secrets s \
         WHERE s.team_id = ? AND s.vault_id = ? AND s.id = ? AND {LATEST_ONLY}"
    ))
    .bind(team_id)
    .bind(vault_id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::DoesntExist)
}

/// Load the vault for a secret mutation. The acting user must still hold a
/// sealed key for it; otherwise the vault does not exist for them.
async fn writable_vault(conn: &mut SqliteConnection, vault: &Vault, user: &User) -> Result<Vault> {
    if !has_access(conn, &vault.team_id, &vault.id, &user.id).await? {
        return Err(StoreError::DoesntExist);
    }
    fetch_vault(conn, &vault.team_id, &vault.id).await
}

impl Store {
    async fn add_secret_tx(
        &self,
        conn: &mut SqliteConnection,
        vault: &Vault,
        data: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<Secret> {
        kc_crypto::verify_and_unpack(&vault.public_key, &data)?;
        let mut secret = Secret {
            team_id: vault.team_id.clone(),
            vault_id: vault.id.clone(),
            id: String::new(),
            version: 1,
            vault_version: touch(conn, &vault.team_id, &vault.id, now).await?,
            data,
            created_at: now,
        };
        for attempt in 1..=ID_ATTEMPTS {
            secret.id = self.token(SECRET_ID_LEN);
            validate::secret(&secret)?;
            match insert_revision(conn, &secret).await {
                Ok(()) => return Ok(secret),
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt, "secret id collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::AlreadyExists)
    }

    /// Store a new secret. `data` must be signed by the vault.
    pub async fn add_secret(&self, vault: &Vault, user: &User, data: Vec<u8>) -> Result<Secret> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let stored = writable_vault(&mut tx, vault, user).await?;
        let secret = self.add_secret_tx(&mut tx, &stored, data, now).await?;
        tx.commit().await?;
        info!(team = %secret.team_id, vault = %secret.vault_id, secret = %secret.id, vault_version = secret.vault_version, "secret added");
        Ok(secret)
    }

    /// Many secrets in one transaction. The vault version moves once per item.
    pub async fn add_secret_list(&self, vault: &Vault, user: &User, data: Vec<Vec<u8>>) -> Result<Vec<Secret>> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let stored = writable_vault(&mut tx, vault, user).await?;
        let mut out = Vec::with_capacity(data.len());
        for item in data {
            out.push(self.add_secret_tx(&mut tx, &stored, item, now).await?);
        }
        tx.commit().await?;
        info!(team = %vault.team_id, vault = %vault.id, count = out.len(), "secrets added");
        Ok(out)
    }

    /// Append a revision. Its version is always the stored one plus one.
    pub async fn update_secret(&self, vault: &Vault, user: &User, id: &str, data: Vec<u8>) -> Result<Secret> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let stored = writable_vault(&mut tx, vault, user).await?;
        kc_crypto::verify_and_unpack(&stored.public_key, &data)?;
        let current = latest_version(&mut tx, &vault.team_id, &vault.id, id)
            .await?
            .ok_or(StoreError::DoesntExist)?;

        let secret = Secret {
            team_id: vault.team_id.clone(),
            vault_id: vault.id.clone(),
            id: id.to_owned(),
            version: current + 1,
            vault_version: touch(&mut tx, &vault.team_id, &vault.id, now).await?,
            data,
            created_at: now,
        };
        validate::secret(&secret)?;
        insert_revision(&mut tx, &secret)
            .await
            .map_err(on_unique(StoreError::AlreadyExists))?;
        tx.commit().await?;
        info!(team = %secret.team_id, vault = %secret.vault_id, secret = %secret.id, version = secret.version, vault_version = secret.vault_version, "secret updated");
        Ok(secret)
    }

    /// Delete a secret with its whole history. Returns the new vault version.
    pub async fn delete_secret(&self, vault: &Vault, user: &User, id: &str) -> Result<i64> {
        let now = self.now();
        let mut tx = self.begin().await?;
        writable_vault(&mut tx, vault, user).await?;
        let version = touch(&mut tx, &vault.team_id, &vault.id, now).await?;
        let res = sqlx::query("DELETE FROM secrets WHERE team_id = ? AND vault_id = ? AND id = ?")
            .bind(&vault.team_id)
            .bind(&vault.id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        affected(res)?;
        tx.commit().await?;
        info!(team = %vault.team_id, vault = %vault.id, secret = %id, vault_version = version, "secret deleted");
        Ok(version)
    }

    /// Move a secret, history included, to another vault (possibly in another
    /// team). Both vaults are touched; the moved revisions carry the target's
    /// new version. Returns the newest revision at its new location.
    pub async fn move_to_team_vault(&self, user: &User, from: &Vault, id: &str, to: &Vault) -> Result<Secret> {
        let now = self.now();
        let mut tx = self.begin().await?;
        writable_vault(&mut tx, from, user).await?;
        writable_vault(&mut tx, to, user).await?;

        touch(&mut tx, &from.team_id, &from.id, now).await?;
        let target_version = touch(&mut tx, &to.team_id, &to.id, now).await?;
        let res = sqlx::query(
            "UPDATE secrets SET team_id = ?, vault_id = ?, vault_version = ? \
             WHERE team_id = ? AND vault_id = ? AND id = ?",
        )
        .bind(&to.team_id)
        .bind(&to.id)
        .bind(target_version)
        .bind(&from.team_id)
        .bind(&from.id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(on_unique(StoreError::AlreadyExists))?;
        affected(res)?;

        let moved = fetch_latest(&mut tx, &to.team_id, &to.id, id).await?;
        tx.commit().await?;
        info!(
            secret = %id,
            from_team = %from.team_id, from_vault = %from.id,
            to_team = %to.team_id, to_vault = %to.id,
            "secret moved"
        );
        Ok(moved)
    }

    /// Newest revision of every secret in one vault.
    pub async fn get_secrets(&self, vault: &Vault, user: &User) -> Result<Vec<Secret>> {
        let mut tx = self.begin().await?;
        writable_vault(&mut tx, vault, user).await?;
        let secrets = sqlx::query_as::<_, Secret>(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets s \
             WHERE s.team_id = ? AND s.vault_id = ? AND {LATEST_ONLY} ORDER BY s.id"
        ))
        .bind(&vault.team_id)
        .bind(&vault.id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(secrets)
    }

    /// Newest revision of every secret in every team vault the user can open.
    pub async fn get_secrets_for_team(&self, team: &Team, user: &User) -> Result<Vec<Secret>> {
        Ok(sqlx::query_as::<_, Secret>(&format!(
            "SELECT {SECRET_COLUMNS} FROM secrets s \
             JOIN vault_users vu ON vu.team_id = s.team_id AND vu.vault_id = s.vault_id \
             WHERE s.team_id = ? AND vu.user_id = ? AND {LATEST_ONLY} \
             ORDER BY s.vault_id, s.id"
        ))
        .bind(&team.id)
        .bind(&user.id)
        .fetch_all(self.pool())
        .await?)
    }
}
