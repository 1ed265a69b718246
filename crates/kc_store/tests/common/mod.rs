//! Fixtures shared by the store scenario tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use kc_crypto::testkit::{sealed_vault_key, signed_blob, vault_key_pair, ClientKeys};
use kc_store::{NewUser, Store, Team, Token, User, Vault, DEFAULT_VAULT_NAME};

pub const PASSWORD: &str = "hunter22";

/// A registered user plus the key material their client holds.
pub struct Client {
    pub user: User,
    pub keys: ClientKeys,
    pub primary: Team,
    pub token: Token,
}

/// Key material for one vault, as held by its members' clients.
pub struct VaultKeys {
    pub vault: Vault,
    pub keys: ClientKeys,
}

impl VaultKeys {
    /// A signed payload the store will accept for this vault.
    pub fn blob(&self) -> Vec<u8> {
        signed_blob(&self.keys, 48)
    }

    pub fn sealed_for(&self, client: &Client) -> Vec<u8> {
        sealed_vault_key(&self.keys, &client.keys)
    }
}

pub async fn store() -> Store {
    Store::open_in_memory().await.expect("in-memory store")
}

pub fn new_user(id: &str, email: &str) -> (NewUser, ClientKeys, ClientKeys) {
    let keys = ClientKeys::generate();
    let vault = ClientKeys::generate();
    let new = NewUser {
        id: id.to_owned(),
        full_name: format!("{id} example"),
        email: email.to_owned(),
        password: PASSWORD.to_owned(),
        key_pack: keys.registration_pack(),
        vault_keys: vault_key_pair(&keys, &vault, [id]),
    };
    (new, keys, vault)
}

/// Register `id` and return the client plus its primary team's default vault.
pub async fn register(store: &Store, id: &str) -> (Client, VaultKeys) {
    let (new, keys, vault_keys) = new_user(id, &format!("{id}@example.com"));
    let (user, token) = store.register_user(new).await.expect("register");
    let primary = store
        .get_teams(&user)
        .await
        .expect("teams")
        .into_iter()
        .find(|t| t.is_primary)
        .expect("primary team");
    let vault = store
        .get_vault_for_user(&primary, DEFAULT_VAULT_NAME, &user)
        .await
        .expect("default vault");
    (
        Client { user, keys, primary, token },
        VaultKeys { vault, keys: vault_keys },
    )
}

/// Create `name` in `team`, keyed for exactly `admins`.
pub async fn create_vault(store: &Store, team: &Team, creator: &Client, name: &str, admins: &[&Client]) -> VaultKeys {
    let keys = ClientKeys::generate();
    let mut vkp = vault_key_pair(&creator.keys, &keys, Vec::<String>::new());
    for admin in admins {
        vkp.keys.insert(admin.user.id.clone(), sealed_vault_key(&keys, &admin.keys));
    }
    let vault = store
        .create_vault(team, &creator.user, name, &vkp)
        .await
        .expect("create vault");
    VaultKeys { vault, keys }
}

/// Add `member` to `team` through the invite-or-add path.
pub async fn join(store: &Store, team: &Team, admin: &Client, member: &Client) {
    store
        .add_or_invite_user_by_email(team, &admin.user, &member.user.email)
        .await
        .expect("add member");
}

pub async fn version(store: &Store, team: &Team, vault: &str, user: &User) -> i64 {
    store
        .get_vault_for_user(team, vault, user)
        .await
        .expect("vault")
        .version
}

pub fn keys_for(entries: &[(&VaultKeys, &Client)]) -> BTreeMap<String, Vec<u8>> {
    entries
        .iter()
        .map(|(v, c)| (v.vault.id.clone(), v.sealed_for(c)))
        .collect()
}
