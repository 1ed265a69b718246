//! Teams and affiliations: creation, membership changes, admin flags.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kc_crypto::{VaultKeyPair, VerifiedVaultKeys};
use sqlx::SqliteConnection;
use tracing::info;

use crate::authz::{self, Change};
use crate::context::TEAM_ID_LEN;
use crate::db::Store;
use crate::error::{affected, on_unique, Result, StoreError};
use crate::models::{
    Invitation, Team, TeamUser, TeamUserFull, User, Vault, DEFAULT_VAULT_NAME, TEAM_COLUMNS,
};
use crate::{invite, user, validate, vault};

// ── Row helpers ─────────────────────────────────────────────────────────────

pub(crate) async fn fetch_team(conn: &mut SqliteConnection, team_id: &str) -> Result<Team> {
    sqlx::query_as::<_, Team>(&format!("SELECT {TEAM_COLUMNS} FROM teams t WHERE t.id = ?"))
        .bind(team_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::DoesntExist)
}

pub(crate) async fn affiliation(
    conn: &mut SqliteConnection,
    team_id: &str,
    user_id: &str,
) -> Result<Option<TeamUser>> {
    Ok(sqlx::query_as::<_, TeamUser>(
        "SELECT team_id, user_id, is_admin, access_required FROM team_users \
         WHERE team_id = ? AND user_id = ?",
    )
    .bind(team_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?)
}

pub(crate) async fn admin_ids(conn: &mut SqliteConnection, team_id: &str) -> Result<BTreeSet<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT user_id FROM team_users WHERE team_id = ? AND is_admin = 1")
            .bind(team_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub(crate) async fn insert_affiliation(
    conn: &mut SqliteConnection,
    team_id: &str,
    user_id: &str,
    is_admin: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO team_users (team_id, user_id, is_admin, access_required) VALUES (?, ?, ?, 0)",
    )
    .bind(team_id)
    .bind(user_id)
    .bind(is_admin)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyInTeam))?;
    Ok(())
}

async fn set_admin(conn: &mut SqliteConnection, team_id: &str, user_id: &str, is_admin: bool) -> Result<()> {
    let res = sqlx::query("UPDATE team_users SET is_admin = ? WHERE team_id = ? AND user_id = ?")
        .bind(is_admin)
        .bind(team_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    affected(res).map(|_| ())
}

/// Team row, owner affiliation and default vault. The vault keys must be
/// addressed to the owner and nobody else.
pub(crate) async fn create_team_tx(
    conn: &mut SqliteConnection,
    store: &Store,
    owner: &User,
    is_primary: bool,
    name: &str,
    keys: &VerifiedVaultKeys,
    now: DateTime<Utc>,
) -> Result<Team> {
    let team = Team {
        id: store.token(TEAM_ID_LEN),
        name: name.to_owned(),
        owner_id: owner.id.clone(),
        is_primary,
        size: 1,
        created_at: now,
        updated_at: now,
    };
    validate::team(&team)?;
    keys.check_key_ids_match([owner.id.as_str()])?;

    sqlx::query(
        "INSERT INTO teams (id, name, owner_id, is_primary, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&team.id)
    .bind(&team.name)
    .bind(&team.owner_id)
    .bind(team.is_primary)
    .bind(team.created_at)
    .bind(team.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;

    insert_affiliation(conn, &team.id, &owner.id, true).await?;
    vault::insert_vault(conn, &team.id, DEFAULT_VAULT_NAME, keys, now).await?;
    Ok(team)
}

// ── Operations ──────────────────────────────────────────────────────────────

impl Store {
    pub async fn create_team(&self, owner: &User, name: &str, keys: &VaultKeyPair) -> Result<Team> {
        let verified = keys.verify_and_unpack(&owner.public_key)?;
        let now = self.now();
        let mut tx = self.begin().await?;
        let team = create_team_tx(&mut tx, self, owner, false, name, &verified, now).await?;
        tx.commit().await?;
        info!(team = %team.id, owner = %owner.id, "team created");
        Ok(team)
    }

    /// `true` for admins, `false` for plain members, `NotInTeam` otherwise.
    pub async fn check_admin(&self, team: &Team, user: &User) -> Result<bool> {
        let mut conn = self.pool().acquire().await?;
        let aff = affiliation(&mut conn, &team.id, &user.id).await?;
        Ok(authz::require_member(aff.as_ref())?.is_admin)
    }

    /// A new vault. Its keys must go to every current admin and only to them.
    pub async fn create_vault(
        &self,
        team: &Team,
        requester: &User,
        name: &str,
        keys: &VaultKeyPair,
    ) -> Result<Vault> {
        validate::vault_name(name)?;
        let verified = keys.verify_and_unpack(&requester.public_key)?;
        let now = self.now();
        let mut tx = self.begin().await?;

        let aff = affiliation(&mut tx, &team.id, &requester.id).await?;
        authz::require_admin(aff.as_ref())?;
        let admins = admin_ids(&mut tx, &team.id).await?;
        verified.check_key_ids_match(&admins)?;

        let vault = vault::insert_vault(&mut tx, &team.id, name, &verified, now).await?;
        tx.commit().await?;
        info!(team = %team.id, vault = %vault.id, "vault created");
        Ok(vault)
    }

    /// Add a registered user as a plain member, or invite the address.
    pub async fn add_or_invite_user_by_email(
        &self,
        team: &Team,
        admin: &User,
        email: &str,
    ) -> Result<Invitation> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let admin_aff = affiliation(&mut tx, &team.id, &admin.id).await?;
        authz::require_admin(admin_aff.as_ref())?;

        let outcome = match user::fetch_user_by_email(&mut tx, email).await {
            Ok(newcomer) => {
                let existing = affiliation(&mut tx, &team.id, &newcomer.id).await?;
                authz::addition(admin_aff.as_ref(), existing.as_ref())?;
                insert_affiliation(&mut tx, &team.id, &newcomer.id, false).await?;
                info!(team = %team.id, user = %newcomer.id, "user added to team");
                Invitation::Added(newcomer)
            }
            Err(StoreError::DoesntExist) => {
                let inv = invite::insert_invite(&mut tx, &team.id, email, now).await?;
                info!(team = %team.id, "invite created");
                Invitation::Invited(inv)
            }
            Err(e) => return Err(e),
        };
        tx.commit().await?;
        Ok(outcome)
    }

    /// Grant admin. `keys.keys` must hold, per vault id, a sealed vault key
    /// for every vault the promotee cannot open yet, and nothing more. Each
    /// key is checked against its own vault before anything is written.
    pub async fn promote_user(
        &self,
        team: &Team,
        promoter: &User,
        promotee_id: &str,
        keys: &VaultKeyPair,
    ) -> Result<()> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let promoter_aff = affiliation(&mut tx, &team.id, &promoter.id).await?;
        let promotee_aff = affiliation(&mut tx, &team.id, promotee_id).await?;
        if authz::promotion(promoter_aff.as_ref(), promotee_aff.as_ref())? == Change::NoOp {
            return Ok(());
        }

        let missing = vault::vaults_missing_for_user(&mut tx, &team.id, promotee_id).await?;
        keys.check_key_ids_match(missing.iter().map(|v| v.id.as_str()))?;
        for v in &missing {
            let key = keys.keys.get(&v.id).ok_or(StoreError::InvalidKeys)?;
            kc_crypto::verify_and_unpack(&v.public_key, key)?;
            vault::insert_vault_user(&mut tx, &team.id, &v.id, promotee_id, key, now).await?;
            vault::touch(&mut tx, &team.id, &v.id, now).await?;
        }
        set_admin(&mut tx, &team.id, promotee_id, true).await?;
        tx.commit().await?;
        info!(team = %team.id, user = %promotee_id, grants = missing.len(), "user promoted");
        Ok(())
    }

    /// Drop admin. Vault access already granted stays in place.
    pub async fn demote_user(&self, team: &Team, demoter: &User, demotee_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let stored = fetch_team(&mut tx, &team.id).await?;
        let demoter_aff = affiliation(&mut tx, &team.id, &demoter.id).await?;
        let demotee_aff = affiliation(&mut tx, &team.id, demotee_id).await?;
        let change = authz::demotion(&stored, demoter_aff.as_ref(), demotee_id, demotee_aff.as_ref())?;
        if change == Change::NoOp {
            return Ok(());
        }
        set_admin(&mut tx, &team.id, demotee_id, false).await?;
        tx.commit().await?;
        info!(team = %team.id, user = %demotee_id, "user demoted");
        Ok(())
    }

    /// Remove a member from the team and from every vault of it.
    pub async fn remove_user_from_team(&self, team: &Team, admin: &User, target_id: &str) -> Result<()> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let stored = fetch_team(&mut tx, &team.id).await?;
        let admin_aff = affiliation(&mut tx, &team.id, &admin.id).await?;
        let target_aff = affiliation(&mut tx, &team.id, target_id).await?;
        authz::removal_from_team(&stored, admin_aff.as_ref(), target_id, target_aff.as_ref())?;

        let vaults = vault::vault_ids_for_user(&mut tx, &team.id, target_id).await?;
        sqlx::query("DELETE FROM vault_users WHERE team_id = ? AND user_id = ?")
            .bind(&team.id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        for vault_id in &vaults {
            vault::touch(&mut tx, &team.id, vault_id, now).await?;
        }
        let res = sqlx::query("DELETE FROM team_users WHERE team_id = ? AND user_id = ?")
            .bind(&team.id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        affected(res)?;
        tx.commit().await?;
        info!(team = %team.id, user = %target_id, vaults = vaults.len(), "user removed from team");
        Ok(())
    }

    /// Members with their admin flag, name and public key pack.
    pub async fn get_users_affiliation_full(&self, team: &Team) -> Result<Vec<TeamUserFull>> {
        Ok(sqlx::query_as::<_, TeamUserFull>(
            "SELECT tu.user_id, tu.is_admin, u.full_name, u.public_key \
             FROM team_users tu JOIN users u ON u.id = tu.user_id \
             WHERE tu.team_id = ? ORDER BY tu.user_id",
        )
        .bind(&team.id)
        .fetch_all(self.pool())
        .await?)
    }
}
