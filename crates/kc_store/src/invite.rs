//! Outstanding invitations for addresses nobody has registered yet.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db::Store;
use crate::error::{on_unique, Result, StoreError};
use crate::models::{Invite, Team};
use crate::validate::is_valid_email;

pub(crate) async fn insert_invite(
    conn: &mut SqliteConnection,
    team_id: &str,
    email: &str,
    now: DateTime<Utc>,
) -> Result<Invite> {
    if !is_valid_email(email) {
        return Err(StoreError::InvalidEmail);
    }
    let invite = Invite {
        team_id: team_id.to_owned(),
        email: email.to_owned(),
        created_at: now,
    };
    sqlx::query("INSERT INTO invites (team_id, email, created_at) VALUES (?, ?, ?)")
        .bind(&invite.team_id)
        .bind(&invite.email)
        .bind(invite.created_at)
        .execute(&mut *conn)
        .await
        .map_err(on_unique(StoreError::AlreadyInvited))?;
    Ok(invite)
}

pub(crate) async fn invites_for_email(conn: &mut SqliteConnection, email: &str) -> Result<Vec<Invite>> {
    Ok(sqlx::query_as::<_, Invite>(
        "SELECT team_id, email, created_at FROM invites WHERE email = ? ORDER BY created_at, team_id",
    )
    .bind(email)
    .fetch_all(&mut *conn)
    .await?)
}

pub(crate) async fn delete_invite(conn: &mut SqliteConnection, invite: &Invite) -> Result<()> {
    sqlx::query("DELETE FROM invites WHERE team_id = ? AND email = ?")
        .bind(&invite.team_id)
        .bind(&invite.email)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl Store {
    pub async fn get_invites(&self, team: &Team) -> Result<Vec<Invite>> {
        Ok(sqlx::query_as::<_, Invite>(
            "SELECT team_id, email, created_at FROM invites WHERE team_id = ? ORDER BY email",
        )
        .bind(&team.id)
        .fetch_all(self.pool())
        .await?)
    }
}
