//! Vaults, their version counter, and per-member sealed keys.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kc_crypto::VerifiedVaultKeys;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::authz;
use crate::db::Store;
use crate::error::{affected, on_unique, Result, StoreError};
use crate::models::{Team, User, Vault, VaultFull};
use crate::team::affiliation;
use crate::validate;

const VAULT_COLUMNS: &str = "v.team_id, v.id, v.version, v.public_key, v.created_at, v.updated_at";

/// Bump the vault's version and return the new value.
///
/// This single statement is what orders concurrent writers on one vault.
pub(crate) async fn touch(
    conn: &mut SqliteConnection,
    team_id: &str,
    vault_id: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as(
        "UPDATE vaults SET version = version + 1, updated_at = ? \
         WHERE team_id = ? AND id = ? RETURNING version",
    )
    .bind(now)
    .bind(team_id)
    .bind(vault_id)
    .fetch_optional(&mut *conn)
    .await?;
    let (version,) = row.ok_or(StoreError::DoesntExist)?;
    debug!(team = %team_id, vault = %vault_id, version, "vault touched");
    Ok(version)
}

pub(crate) async fn fetch_vault(conn: &mut SqliteConnection, team_id: &str, vault_id: &str) -> Result<Vault> {
    sqlx::query_as::<_, Vault>(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults v WHERE v.team_id = ? AND v.id = ?"
    ))
    .bind(team_id)
    .bind(vault_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::DoesntExist)
}

/// The vault, if `user_id` holds a sealed key for it.
pub(crate) async fn fetch_vault_for_user(
    conn: &mut SqliteConnection,
    team_id: &str,
    vault_id: &str,
    user_id: &str,
) -> Result<Vault> {
    sqlx::query_as::<_, Vault>(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults v \
         JOIN vault_users vu ON vu.team_id = v.team_id AND vu.vault_id = v.id \
         WHERE v.team_id = ? AND v.id = ? AND vu.user_id = ?"
    ))
    .bind(team_id)
    .bind(vault_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::DoesntExist)
}

/// Insert a vault at version 1 with one sealed key per recipient.
pub(crate) async fn insert_vault(
    conn: &mut SqliteConnection,
    team_id: &str,
    name: &str,
    keys: &VerifiedVaultKeys,
    now: DateTime<Utc>,
) -> Result<Vault> {
    sqlx::query(
        "INSERT INTO vaults (team_id, id, version, public_key, created_at, updated_at) \
         VALUES (?, ?, 1, ?, ?, ?)",
    )
    .bind(team_id)
    .bind(name)
    .bind(&keys.public_key)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;

    for (user_id, key) in &keys.keys {
        insert_vault_user(conn, team_id, name, user_id, key, now).await?;
    }
    Ok(Vault {
        team_id: team_id.to_owned(),
        id: name.to_owned(),
        version: 1,
        public_key: keys.public_key.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub(crate) async fn insert_vault_user(
    conn: &mut SqliteConnection,
    team_id: &str,
    vault_id: &str,
    user_id: &str,
    key: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    validate::sealed_key(user_id, key)?;
    sqlx::query(
        "INSERT INTO vault_users (team_id, vault_id, user_id, sealed_key, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(team_id)
    .bind(vault_id)
    .bind(user_id)
    .bind(key)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;
    Ok(())
}

pub(crate) async fn has_access(
    conn: &mut SqliteConnection,
    team_id: &str,
    vault_id: &str,
    user_id: &str,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM vault_users WHERE team_id = ? AND vault_id = ? AND user_id = ?",
    )
    .bind(team_id)
    .bind(vault_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

pub(crate) async fn vault_ids_for_user(
    conn: &mut SqliteConnection,
    team_id: &str,
    user_id: &str,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT vault_id FROM vault_users WHERE team_id = ? AND user_id = ? ORDER BY vault_id",
    )
    .bind(team_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn vaults_for_user(
    conn: &mut SqliteConnection,
    team_id: &str,
    user_id: &str,
) -> Result<Vec<Vault>> {
    Ok(sqlx::query_as::<_, Vault>(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults v \
         JOIN vault_users vu ON vu.team_id = v.team_id AND vu.vault_id = v.id \
         WHERE v.team_id = ? AND vu.user_id = ? ORDER BY v.id"
    ))
    .bind(team_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub(crate) async fn vaults_missing_for_user(
    conn: &mut SqliteConnection,
    team_id: &str,
    user_id: &str,
) -> Result<Vec<Vault>> {
    Ok(sqlx::query_as::<_, Vault>(&format!(
        "SELECT {VAULT_COLUMNS} FROM vaults v WHERE v.team_id = ? AND NOT EXISTS \
         (SELECT 1 FROM vault_users vu WHERE vu.team_id = v.team_id AND vu.vault_id = v.id AND vu.user_id = ?) \
         ORDER BY v.id"
    ))
    .bind(team_id)
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?)
}

impl Store {
    pub async fn get_vault_for_user(&self, team: &Team, vault_id: &str, user: &User) -> Result<Vault> {
        let mut conn = self.pool().acquire().await?;
        fetch_vault_for_user(&mut conn, &team.id, vault_id, &user.id).await
    }

    pub async fn get_vaults_for_user(&self, team: &Team, user: &User) -> Result<Vec<Vault>> {
        let mut conn = self.pool().acquire().await?;
        vaults_for_user(&mut conn, &team.id, &user.id).await
    }

    /// Vaults the user can open, each with the user's sealed key and the
    /// ids of everyone else holding one.
    pub async fn get_vaults_full_for_user(&self, team: &Team, user: &User) -> Result<Vec<VaultFull>> {
        let mut tx = self.begin().await?;
        let mut vaults = sqlx::query_as::<_, VaultFull>(&format!(
            "SELECT {VAULT_COLUMNS}, vu.sealed_key FROM vaults v \
             JOIN vault_users vu ON vu.team_id = v.team_id AND vu.vault_id = v.id \
             WHERE v.team_id = ? AND vu.user_id = ? ORDER BY v.id"
        ))
        .bind(&team.id)
        .bind(&user.id)
        .fetch_all(&mut *tx)
        .await?;

        for vf in &mut vaults {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT user_id FROM vault_users WHERE team_id = ? AND vault_id = ? ORDER BY user_id",
            )
            .bind(&team.id)
            .bind(&vf.vault.id)
            .fetch_all(&mut *tx)
            .await?;
            vf.users = rows.into_iter().map(|(id,)| id).collect();
        }
        tx.commit().await?;
        Ok(vaults)
    }

    pub async fn get_vaults_missing_for_user(&self, team: &Team, user: &User) -> Result<Vec<Vault>> {
        let mut conn = self.pool().acquire().await?;
        vaults_missing_for_user(&mut conn, &team.id, &user.id).await
    }

    /// Give team members access: `keys` maps user id to their sealed copy of
    /// the vault key, each signed by the vault. One version bump for the batch.
    pub async fn add_users_to_vault(
        &self,
        vault: &Vault,
        admin: &User,
        keys: &BTreeMap<String, Vec<u8>>,
    ) -> Result<Vault> {
        if keys.is_empty() {
            return Err(StoreError::InvalidKeys);
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        let admin_aff = affiliation(&mut tx, &vault.team_id, &admin.id).await?;
        authz::require_admin(admin_aff.as_ref())?;
        let mut stored = fetch_vault(&mut tx, &vault.team_id, &vault.id).await?;

        for (user_id, key) in keys {
            let aff = affiliation(&mut tx, &vault.team_id, user_id).await?;
            authz::require_member(aff.as_ref())?;
            kc_crypto::verify_and_unpack(&stored.public_key, key)?;
            insert_vault_user(&mut tx, &vault.team_id, &vault.id, user_id, key, now).await?;
        }
        stored.version = touch(&mut tx, &vault.team_id, &vault.id, now).await?;
        stored.updated_at = now;
        tx.commit().await?;
        info!(team = %vault.team_id, vault = %vault.id, added = keys.len(), version = stored.version, "users added to vault");
        Ok(stored)
    }

    pub async fn remove_user_from_vault(&self, vault: &Vault, admin: &User, user_id: &str) -> Result<Vault> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let admin_aff = affiliation(&mut tx, &vault.team_id, &admin.id).await?;
        let target_aff = affiliation(&mut tx, &vault.team_id, user_id).await?;
        authz::removal_from_vault(admin_aff.as_ref(), target_aff.as_ref())?;
        let mut stored = fetch_vault(&mut tx, &vault.team_id, &vault.id).await?;

        let res = sqlx::query("DELETE FROM vault_users WHERE team_id = ? AND vault_id = ? AND user_id = ?")
            .bind(&vault.team_id)
            .bind(&vault.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        affected(res)?;
        stored.version = touch(&mut tx, &vault.team_id, &vault.id, now).await?;
        stored.updated_at = now;
        tx.commit().await?;
        info!(team = %vault.team_id, vault = %vault.id, user = %user_id, "user removed from vault");
        Ok(stored)
    }
}
