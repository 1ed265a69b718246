//! kc_store — Team/vault authorization and versioned secret storage
//!
//! The server never opens a sealed key or a secret payload. It checks
//! signatures, admits exactly the keys a membership change requires, and
//! orders every accepted write on a vault through that vault's version.
//!
//! # Transactions
//! Every mutation runs in one SQLite transaction: authorize, bump the vault
//! version (`vault::touch`), write, commit. An early `?` drops the
//! transaction, which rolls it back.
//!
//! # Module layout
//! - `authz`   — pure admission decisions over affiliation rows
//! - `user`    — registration, lookup, email confirmation
//! - `team`    — teams, affiliations, vault creation, promote/demote
//! - `vault`   — version counter, sealed per-member keys
//! - `secret`  — secret revisions, moves, latest-revision reads
//! - `invite`  — invitations for unregistered addresses
//! - `token`   — one-time verification tokens
//! - `session` — `SessionStore` with SQL and in-memory backends
//! - `context` — injected clock and entropy
//! - `error`   — unified error type

pub mod authz;
pub mod context;
pub mod db;
pub mod error;
pub mod invite;
pub mod models;
pub mod secret;
pub mod session;
pub mod team;
pub mod token;
pub mod user;
pub mod validate;
pub mod vault;

pub use context::{Clock, Entropy, ManualClock, OsEntropy, SeededEntropy, SystemClock};
pub use db::Store;
pub use error::{FieldErrors, StoreError};
pub use models::{
    Invitation, Invite, Secret, Team, TeamUser, TeamUserFull, Token, TokenType, User, Vault,
    VaultFull, DEFAULT_VAULT_NAME,
};
pub use session::{MemorySessionStore, Session, SessionStore, SqlSessionStore};
pub use user::NewUser;
