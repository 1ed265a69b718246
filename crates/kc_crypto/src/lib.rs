//! kc_crypto — Keycat signature envelopes and key packs
//!
//! The server never holds a private key. Everything in this crate either
//! verifies a signature over an opaque blob or checks that a set of sealed
//! keys covers exactly the principals it must.
//!
//! # Module layout
//! - `pack`       — sign-and-pack / verify-and-unpack envelopes, user key packs
//! - `vault_keys` — `VaultKeyPair` verification and exact-match id checks
//! - `password`   — Argon2id password hashing (PHC strings)
//! - `encoding`   — serde helpers for base64 byte fields on the wire
//! - `testkit`    — client simulation, feature `testkit` only
//! - `error`      — unified error type

pub mod encoding;
pub mod error;
pub mod pack;
pub mod password;
pub mod vault_keys;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::CryptoError;
pub use pack::{expand_user_key_pack, sign_and_pack, verify_and_unpack};
pub use vault_keys::{check_key_ids_match, VaultKeyPair, VerifiedVaultKeys};
