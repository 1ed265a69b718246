//! Pluggable session persistence.
//!
//! The transports only ever resolve a bearer id through `SessionStore`; which
//! backend holds the rows is a deployment choice.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::{random_token, Clock, Entropy, OsEntropy, SystemClock, SESSION_ID_LEN};
use crate::db::Store;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::secret::ID_ATTEMPTS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub agent: String,
    #[serde(rename = "csrf")]
    pub requires_csrf: bool,
    pub last_access: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, user_id: &str, agent: &str, requires_csrf: bool) -> Result<Session>;

    /// `DoesntExist` for unknown ids.
    async fn get(&self, id: &str) -> Result<Session>;

    /// Record a new access from `agent`.
    async fn update(&self, id: &str, agent: &str) -> Result<Session>;

    /// Unknown ids are not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>>;

    async fn delete_all_for_user(&self, user_id: &str) -> Result<()>;
}

// ── SQL ─────────────────────────────────────────────────────────────────────

/// Sessions in the store's own database.
#[derive(Clone)]
pub struct SqlSessionStore {
    store: Store,
}

impl SqlSessionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn create(&self, user_id: &str, agent: &str, requires_csrf: bool) -> Result<Session> {
        for attempt in 1..=ID_ATTEMPTS {
            let session = Session {
                id: self.store.token(SESSION_ID_LEN),
                user_id: user_id.to_owned(),
                agent: agent.to_owned(),
                requires_csrf,
                last_access: self.store.now(),
            };
            let res = sqlx::query(
                "INSERT INTO sessions (id, user_id, agent, requires_csrf, last_access) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&session.id)
            .bind(&session.user_id)
            .bind(&session.agent)
            .bind(session.requires_csrf)
            .bind(session.last_access)
            .execute(self.store.writer())
            .await;
            match res {
                Ok(_) => {
                    debug!(user = %user_id, "session created");
                    return Ok(session);
                }
                Err(e) if is_unique_violation(&e) => warn!(attempt, "session id collision"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::AlreadyExists)
    }

    async fn get(&self, id: &str) -> Result<Session> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, agent, requires_csrf, last_access FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.store.pool())
        .await?
        .ok_or(StoreError::DoesntExist)
    }

    async fn update(&self, id: &str, agent: &str) -> Result<Session> {
        sqlx::query_as::<_, Session>(
            "UPDATE sessions SET agent = ?, last_access = ? WHERE id = ? \
             RETURNING id, user_id, agent, requires_csrf, last_access",
        )
        .bind(agent)
        .bind(self.store.now())
        .bind(id)
        .fetch_optional(self.store.writer())
        .await?
        .ok_or(StoreError::DoesntExist)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.store.writer())
            .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT id, user_id, agent, requires_csrf, last_access FROM sessions \
             WHERE user_id = ? ORDER BY last_access, id",
        )
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(self.store.writer())
            .await?;
        Ok(())
    }
}

// ── Memory ──────────────────────────────────────────────────────────────────

/// Process-local sessions, lost on restart.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>, entropy: Arc<dyn Entropy>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            entropy,
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(OsEntropy))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: &str, agent: &str, requires_csrf: bool) -> Result<Session> {
        let mut sessions = self.sessions.write();
        for attempt in 1..=ID_ATTEMPTS {
            let id = random_token(self.entropy.as_ref(), SESSION_ID_LEN);
            if sessions.contains_key(&id) {
                warn!(attempt, "session id collision");
                continue;
            }
            let session = Session {
                id: id.clone(),
                user_id: user_id.to_owned(),
                agent: agent.to_owned(),
                requires_csrf,
                last_access: self.clock.now(),
            };
            sessions.insert(id, session.clone());
            return Ok(session);
        }
        Err(StoreError::AlreadyExists)
    }

    async fn get(&self, id: &str) -> Result<Session> {
        self.sessions.read().get(id).cloned().ok_or(StoreError::DoesntExist)
    }

    async fn update(&self, id: &str, agent: &str) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or(StoreError::DoesntExist)?;
        session.agent = agent.to_owned();
        session.last_access = self.clock.now();
        Ok(session.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().remove(id);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut out: Vec<_> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.last_access.cmp(&b.last_access).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<()> {
        self.sessions.write().retain(|_, s| s.user_id != user_id);
        Ok(())
    }
}
