//! Users: registration, lookup, password and email changes.

use kc_crypto::password::{hash_password, verify_password};
use kc_crypto::VaultKeyPair;
use sqlx::SqliteConnection;
use tracing::info;

use crate::db::Store;
use crate::error::{affected, on_unique, Result, StoreError};
use crate::models::{Team, Token, TokenType, User, TEAM_COLUMNS};
use crate::team::{create_team_tx, insert_affiliation};
use crate::token::insert_token;
use crate::{invite, validate};

/// What a client uploads to register.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    /// `public pack | sealed private pack`.
    pub key_pack: Vec<u8>,
    /// Keys for the default vault of the user's primary team.
    pub vault_keys: VaultKeyPair,
}

pub(crate) async fn fetch_user(conn: &mut SqliteConnection, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::DoesntExist)
}

pub(crate) async fn fetch_user_by_email(conn: &mut SqliteConnection, email: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::DoesntExist)
}

async fn insert_user(conn: &mut SqliteConnection, u: &User) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, email, unconfirmed_email, hash_pass, full_name, confirmed_at, \
         locked_at, sign_in_count, failed_attempts, public_key, private_key, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&u.id)
    .bind(&u.email)
    .bind(&u.unconfirmed_email)
    .bind(&u.hash_pass)
    .bind(&u.full_name)
    .bind(u.confirmed_at)
    .bind(u.locked_at)
    .bind(u.sign_in_count)
    .bind(u.failed_attempts)
    .bind(&u.public_key)
    .bind(&u.private_key)
    .bind(u.created_at)
    .bind(u.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;
    Ok(())
}

pub(crate) async fn update_user(conn: &mut SqliteConnection, u: &User) -> Result<()> {
    let res = sqlx::query(
        "UPDATE users SET email = ?, unconfirmed_email = ?, hash_pass = ?, full_name = ?, \
         confirmed_at = ?, locked_at = ?, sign_in_count = ?, failed_attempts = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&u.email)
    .bind(&u.unconfirmed_email)
    .bind(&u.hash_pass)
    .bind(&u.full_name)
    .bind(u.confirmed_at)
    .bind(u.locked_at)
    .bind(u.sign_in_count)
    .bind(u.failed_attempts)
    .bind(u.updated_at)
    .bind(&u.id)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;
    affected(res).map(|_| ())
}

impl User {
    pub fn check_password(&self, password: &str) -> Result<()> {
        if verify_password(password, &self.hash_pass) {
            Ok(())
        } else {
            Err(StoreError::Unauthorized)
        }
    }
}

impl Store {
    /// Register a user with their primary team and its default vault, and
    /// join every team that invited their email. All in one transaction.
    ///
    /// Returns the verification token to mail out.
    pub async fn register_user(&self, new: NewUser) -> Result<(User, Token)> {
        let (public_key, private_key) = kc_crypto::expand_user_key_pack(&new.key_pack)?;
        let now = self.now();
        let mut user = User {
            id: new.id,
            email: new.email.clone(),
            unconfirmed_email: new.email,
            hash_pass: String::new(),
            full_name: new.full_name,
            confirmed_at: None,
            locked_at: None,
            sign_in_count: 0,
            failed_attempts: 0,
            public_key,
            private_key,
            created_at: now,
            updated_at: now,
        };
        validate::user(&user, &new.password)?;
        let vault_keys = new.vault_keys.verify_and_unpack(&user.public_key)?;
        user.hash_pass = hash_password(&new.password, &self.salt())?;

        let mut tx = self.begin().await?;
        insert_user(&mut tx, &user).await?;
        let token = insert_token(&mut tx, self, TokenType::Verification, &user.id, now).await?;
        let team_name = user.full_name.clone();
        create_team_tx(&mut tx, self, &user, true, &team_name, &vault_keys, now).await?;

        let invites = invite::invites_for_email(&mut tx, &user.email).await?;
        for inv in &invites {
            insert_affiliation(&mut tx, &inv.team_id, &user.id, false).await?;
            invite::delete_invite(&mut tx, inv).await?;
        }
        tx.commit().await?;
        info!(user = %user.id, joined = invites.len(), "user registered");
        Ok((user, token))
    }

    pub async fn find_user(&self, id: &str) -> Result<User> {
        let mut conn = self.pool().acquire().await?;
        fetch_user(&mut conn, id).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<User> {
        let mut conn = self.pool().acquire().await?;
        fetch_user_by_email(&mut conn, email).await
    }

    /// Park `email` as unconfirmed and issue a token to confirm it.
    pub async fn request_email_change(&self, user: &User, email: &str) -> Result<(User, Token)> {
        if !validate::is_valid_email(email) {
            return Err(StoreError::InvalidEmail);
        }
        let now = self.now();
        let mut tx = self.begin().await?;
        match fetch_user_by_email(&mut tx, email).await {
            Ok(other) if other.id != user.id => return Err(StoreError::AlreadyExists),
            Ok(_) | Err(StoreError::DoesntExist) => {}
            Err(e) => return Err(e),
        }
        let mut stored = fetch_user(&mut tx, &user.id).await?;
        stored.unconfirmed_email = email.to_owned();
        stored.updated_at = now;
        update_user(&mut tx, &stored).await?;
        let token = insert_token(&mut tx, self, TokenType::Verification, &stored.id, now).await?;
        tx.commit().await?;
        info!(user = %stored.id, "email change requested");
        Ok((stored, token))
    }

    pub async fn get_teams(&self, user: &User) -> Result<Vec<Team>> {
        Ok(sqlx::query_as::<_, Team>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams t JOIN team_users tu ON tu.team_id = t.id \
             WHERE tu.user_id = ? ORDER BY t.created_at, t.id"
        ))
        .bind(&user.id)
        .fetch_all(self.pool())
        .await?)
    }

    /// The team, if `user` belongs to it.
    pub async fn get_team(&self, user: &User, team_id: &str) -> Result<Team> {
        sqlx::query_as::<_, Team>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams t JOIN team_users tu ON tu.team_id = t.id \
             WHERE tu.user_id = ? AND t.id = ?"
        ))
        .bind(&user.id)
        .bind(team_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or(StoreError::DoesntExist)
    }
}
