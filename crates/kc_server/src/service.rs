//! Store operations as the transports see them.
//!
//! Mutations go through the store first. Only an `Ok` (a committed
//! transaction) produces a broadcast or a mail, and neither can fail the
//! request afterwards.

use std::sync::Arc;

use kc_broadcast::Broadcaster;
use kc_proto::{BroadcastAction, VaultVersionMap};
use kc_store::error::Result;
use kc_store::{Invitation, NewUser, Secret, Session, SessionStore, Store, Team, Token, User, Vault};
use serde::Serialize;
use tracing::warn;

use crate::mailer::Mailer;

/// What listeners learn about a removed secret.
#[derive(Debug, Serialize)]
struct Removed<'a> {
    id: &'a str,
}

#[derive(Clone)]
pub struct Service {
    store: Store,
    broadcaster: Broadcaster,
    mailer: Arc<dyn Mailer>,
    sessions: Arc<dyn SessionStore>,
    default_locale: String,
}

impl Service {
    pub fn new(
        store: Store,
        broadcaster: Broadcaster,
        mailer: Arc<dyn Mailer>,
        sessions: Arc<dyn SessionStore>,
        default_locale: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            mailer,
            sessions,
            default_locale: default_locale.into(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    fn locale<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_locale)
    }

    async fn notify<S: Serialize + ?Sized>(&self, team: &str, vault: &str, action: BroadcastAction, secret: &S) {
        if let Err(e) = self.broadcaster.send(team, vault, action, Some(secret)).await {
            warn!(team, vault, %action, error = %e, "broadcast not sent");
        }
    }

    async fn confirmation_mail(&self, user: &User, token: &Token, locale: Option<&str>) {
        if let Err(e) = self.mailer.send_confirmation_mail(user, token, self.locale(locale)).await {
            warn!(user = %user.id, error = %e, "confirmation mail not sent");
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Resolve a bearer session id, recording the access.
    pub async fn authenticate(&self, session_id: &str, agent: &str) -> Result<(Session, User)> {
        let session = self.sessions.update(session_id, agent).await?;
        let user = self.store.find_user(&session.user_id).await?;
        Ok((session, user))
    }

    // ── Users ────────────────────────────────────────────────────────────────

    pub async fn register_user(&self, new: NewUser, locale: Option<&str>) -> Result<(User, Token)> {
        let (user, token) = self.store.register_user(new).await?;
        self.confirmation_mail(&user, &token, locale).await;
        Ok((user, token))
    }

    pub async fn request_email_change(&self, user: &User, email: &str, locale: Option<&str>) -> Result<(User, Token)> {
        let (user, token) = self.store.request_email_change(user, email).await?;
        self.confirmation_mail(&user, &token, locale).await;
        Ok((user, token))
    }

    pub async fn add_or_invite_user_by_email(
        &self,
        team: &Team,
        admin: &User,
        email: &str,
        locale: Option<&str>,
    ) -> Result<Invitation> {
        let outcome = self.store.add_or_invite_user_by_email(team, admin, email).await?;
        if let Invitation::Invited(invite) = &outcome {
            if let Err(e) = self
                .mailer
                .send_invitation_mail(team, admin, invite, self.locale(locale))
                .await
            {
                warn!(team = %team.id, error = %e, "invitation mail not sent");
            }
        }
        Ok(outcome)
    }

    // ── Secrets ──────────────────────────────────────────────────────────────

    pub async fn add_secret(&self, vault: &Vault, user: &User, data: Vec<u8>) -> Result<Secret> {
        let secret = self.store.add_secret(vault, user, data).await?;
        self.notify(&secret.team_id, &secret.vault_id, BroadcastAction::SecretNew, &secret)
            .await;
        Ok(secret)
    }

    pub async fn add_secret_list(&self, vault: &Vault, user: &User, data: Vec<Vec<u8>>) -> Result<Vec<Secret>> {
        let secrets = self.store.add_secret_list(vault, user, data).await?;
        for secret in &secrets {
            self.notify(&secret.team_id, &secret.vault_id, BroadcastAction::SecretNew, secret)
                .await;
        }
        Ok(secrets)
    }

    pub async fn update_secret(&self, vault: &Vault, user: &User, id: &str, data: Vec<u8>) -> Result<Secret> {
        let secret = self.store.update_secret(vault, user, id, data).await?;
        self.notify(&secret.team_id, &secret.vault_id, BroadcastAction::SecretChange, &secret)
            .await;
        Ok(secret)
    }

    pub async fn delete_secret(&self, vault: &Vault, user: &User, id: &str) -> Result<i64> {
        let version = self.store.delete_secret(vault, user, id).await?;
        self.notify(&vault.team_id, &vault.id, BroadcastAction::SecretRemove, &Removed { id })
            .await;
        Ok(version)
    }

    pub async fn move_to_team_vault(&self, user: &User, from: &Vault, id: &str, to: &Vault) -> Result<Secret> {
        let moved = self.store.move_to_team_vault(user, from, id, to).await?;
        self.notify(&from.team_id, &from.id, BroadcastAction::SecretRemove, &Removed { id })
            .await;
        self.notify(&moved.team_id, &moved.vault_id, BroadcastAction::SecretNew, &moved)
            .await;
        Ok(moved)
    }

    // ── Reads used by the transports ─────────────────────────────────────────

    /// Every vault the user can open right now, by team, with its version.
    pub async fn vault_versions(&self, user: &User) -> Result<VaultVersionMap> {
        let mut out = VaultVersionMap::new();
        for team in self.store.get_teams(user).await? {
            let vaults = self.store.get_vaults_for_user(&team, user).await?;
            out.insert(team.id, vaults.into_iter().map(|v| (v.id, v.version)).collect());
        }
        Ok(out)
    }
}
