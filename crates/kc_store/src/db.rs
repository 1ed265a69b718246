//! Database handle over SQLite via sqlx.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Sqlite, Transaction,
};
use tracing::info;

use crate::context::{random_token, Clock, Entropy, OsEntropy, SystemClock};
use crate::error::{Result, StoreError};

pub(crate) type Tx = Transaction<'static, Sqlite>;

/// Central store handle. Cheap to clone (the pools are Arcs internally).
///
/// Reads go through `pool`. Every write goes through `writer`, a single
/// connection, so a transaction that reads before it writes never has to
/// upgrade its lock against another writer.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    writer: SqlitePool,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn Entropy>,
}

impl Store {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL and foreign keys are set per connection, not in a migration:
    /// SQLite refuses to change `journal_mode` inside a transaction.
    pub async fn open(db_path: &Path, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts.clone())
            .await?;
        let pool = if max_connections > 1 {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(opts)
                .await?
        } else {
            writer.clone()
        };
        info!(path = %db_path.display(), max_connections, "opened store");
        Self::from_pools(pool, writer).await
    }

    /// A private in-memory database. One connection, kept for the pool's
    /// whole life, since each new connection would see an empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::from_pools(pool.clone(), pool).await
    }

    async fn from_pools(pool: SqlitePool, writer: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&writer)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            pool,
            writer,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The single-connection pool all writes share.
    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn entropy(&self) -> &Arc<dyn Entropy> {
        &self.entropy
    }

    pub async fn close(&self) {
        self.pool.close().await;
        self.writer.close().await;
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    pub(crate) async fn begin(&self) -> Result<Tx> {
        Ok(self.writer.begin().await?)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn token(&self, len: usize) -> String {
        random_token(self.entropy.as_ref(), len)
    }

    pub(crate) fn salt(&self) -> [u8; kc_crypto::password::SALT_SIZE] {
        let mut salt = [0u8; kc_crypto::password::SALT_SIZE];
        self.entropy.fill(&mut salt);
        salt
    }
}
