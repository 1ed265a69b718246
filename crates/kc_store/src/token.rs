//! One-time tokens. Consumed (deleted) on success.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use crate::context::TOKEN_ID_LEN;
use crate::db::Store;
use crate::error::{affected, on_unique, Fields, Result, StoreError};
use crate::models::{Token, TokenType, User};
use crate::user::{fetch_user, update_user};
use crate::validate::is_valid_username;

const MIN_TOKEN_ID_LEN: usize = 6;

pub(crate) async fn insert_token(
    conn: &mut SqliteConnection,
    store: &Store,
    token_type: TokenType,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Token> {
    let token = Token {
        id: store.token(TOKEN_ID_LEN),
        token_type,
        user_id: user_id.to_owned(),
        extra: None,
        created_at: now,
        updated_at: now,
    };
    Fields::default()
        .check(is_valid_username(&token.user_id), "token_user", "invalid")
        .check(token.id.len() >= MIN_TOKEN_ID_LEN, "token_id", "too short")
        .finish()?;
    sqlx::query(
        "INSERT INTO tokens (id, token_type, user_id, extra, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&token.id)
    .bind(token.token_type)
    .bind(&token.user_id)
    .bind(&token.extra)
    .bind(token.created_at)
    .bind(token.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(on_unique(StoreError::AlreadyExists))?;
    Ok(token)
}

async fn fetch_token(conn: &mut SqliteConnection, id: &str) -> Result<Token> {
    sqlx::query_as::<_, Token>(
        "SELECT id, token_type, user_id, extra, created_at, updated_at FROM tokens WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::DoesntExist)
}

impl Store {
    pub async fn find_token(&self, id: &str) -> Result<Token> {
        let mut conn = self.pool().acquire().await?;
        fetch_token(&mut conn, id).await
    }

    pub async fn find_tokens_for_user(&self, user: &User) -> Result<Vec<Token>> {
        Ok(sqlx::query_as::<_, Token>(
            "SELECT id, token_type, user_id, extra, created_at, updated_at FROM tokens \
             WHERE user_id = ? ORDER BY created_at, id",
        )
        .bind(&user.id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Consume a verification token: the pending email becomes the email,
    /// and `confirmed_at` is set the first time.
    pub async fn confirm_email(&self, token_id: &str) -> Result<User> {
        let now = self.now();
        let mut tx = self.begin().await?;
        let token = fetch_token(&mut tx, token_id).await?;
        if token.token_type != TokenType::Verification {
            return Err(StoreError::DoesntExist);
        }
        let mut user = fetch_user(&mut tx, &token.user_id).await?;

        let res = sqlx::query("DELETE FROM tokens WHERE id = ?")
            .bind(&token.id)
            .execute(&mut *tx)
            .await?;
        affected(res)?;

        if !user.unconfirmed_email.is_empty() {
            user.email = std::mem::take(&mut user.unconfirmed_email);
        }
        user.confirmed_at.get_or_insert(now);
        user.updated_at = now;
        update_user(&mut tx, &user).await?;
        tx.commit().await?;
        info!(user = %user.id, "email confirmed");
        Ok(user)
    }
}
