//! Fixtures for the service and transport scenarios.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use kc_broadcast::{BroadcastConfig, Broadcaster};
use kc_crypto::testkit::{sealed_vault_key, signed_blob, vault_key_pair, ClientKeys};
use kc_server::mailer::{MailError, Mailer};
use kc_server::transport::{self, EventSink};
use kc_server::Service;
use kc_store::{Invite, MemorySessionStore, NewUser, Store, Team, Token, User, Vault, DEFAULT_VAULT_NAME};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Confirmation { user: String, token: String, locale: String },
    Invitation { team: String, email: String, locale: String },
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Sent>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_confirmation_mail(&self, user: &User, token: &Token, locale: &str) -> Result<(), MailError> {
        self.sent.lock().push(Sent::Confirmation {
            user: user.id.clone(),
            token: token.id.clone(),
            locale: locale.to_owned(),
        });
        Ok(())
    }

    async fn send_invitation_mail(&self, team: &Team, _: &User, invite: &Invite, locale: &str) -> Result<(), MailError> {
        self.sent.lock().push(Sent::Invitation {
            team: team.id.clone(),
            email: invite.email.clone(),
            locale: locale.to_owned(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub service: Service,
    pub mail: Arc<RecordingMailer>,
}

pub async fn harness() -> Harness {
    let store = Store::open_in_memory().await.expect("store");
    let (broadcaster, _task) = Broadcaster::spawn(BroadcastConfig {
        subscriber_capacity: 16,
        ..BroadcastConfig::default()
    });
    let mail = Arc::new(RecordingMailer::default());
    let service = Service::new(
        store,
        broadcaster,
        mail.clone(),
        Arc::new(MemorySessionStore::default()),
        "en",
    );
    Harness { service, mail }
}

pub struct Client {
    pub user: User,
    pub keys: ClientKeys,
    pub primary: Team,
    pub token: Token,
}

pub struct VaultKeys {
    pub vault: Vault,
    pub keys: ClientKeys,
}

impl VaultKeys {
    pub fn blob(&self) -> Vec<u8> {
        signed_blob(&self.keys, 48)
    }
}

pub async fn register(service: &Service, id: &str) -> (Client, VaultKeys) {
    let keys = ClientKeys::generate();
    let vault_keys = ClientKeys::generate();
    let new = NewUser {
        id: id.to_owned(),
        full_name: format!("{id} example"),
        email: format!("{id}@example.com"),
        password: "hunter22".to_owned(),
        key_pack: keys.registration_pack(),
        vault_keys: vault_key_pair(&keys, &vault_keys, [id]),
    };
    let (user, token) = service.register_user(new, None).await.expect("register");
    let store = service.store();
    let primary = store
        .get_teams(&user)
        .await
        .expect("teams")
        .into_iter()
        .find(|t| t.is_primary)
        .expect("primary");
    let vault = store
        .get_vault_for_user(&primary, DEFAULT_VAULT_NAME, &user)
        .await
        .expect("vault");
    (Client { user, keys, primary, token }, VaultKeys { vault, keys: vault_keys })
}

/// A vault in `admin`'s primary team, keyed for `admin` alone.
pub async fn create_vault(service: &Service, admin: &Client, name: &str) -> VaultKeys {
    let keys = ClientKeys::generate();
    let vkp = vault_key_pair(&admin.keys, &keys, [admin.user.id.as_str()]);
    let vault = service
        .store()
        .create_vault(&admin.primary, &admin.user, name, &vkp)
        .await
        .expect("create vault");
    VaultKeys { vault, keys }
}

/// Make `member` a plain member of `admin`'s team with access to `vaults`.
pub async fn grant(service: &Service, admin: &Client, member: &Client, vaults: &[&VaultKeys]) {
    let store = service.store();
    if store.check_admin(&admin.primary, &member.user).await.is_err() {
        store
            .add_or_invite_user_by_email(&admin.primary, &admin.user, &member.user.email)
            .await
            .expect("join");
    }
    for v in vaults {
        let keys = [(member.user.id.clone(), sealed_vault_key(&v.keys, &member.keys))]
            .into_iter()
            .collect();
        store
            .add_users_to_vault(&v.vault, &admin.user, &keys)
            .await
            .expect("grant");
    }
}

// ── A sink the test can watch ───────────────────────────────────────────────

#[derive(Debug)]
pub enum Out {
    Message(serde_json::Value),
    Ping,
}

pub struct ChannelSink {
    out: mpsc::UnboundedSender<Out>,
    hangup: oneshot::Receiver<()>,
    /// Fail the write after this many messages.
    pub fail_after: Option<usize>,
    written: usize,
}

pub struct Peer {
    pub rx: mpsc::UnboundedReceiver<Out>,
    pub hangup: Option<oneshot::Sender<()>>,
}

impl Peer {
    pub async fn next(&mut self) -> Out {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.rx.recv())
            .await
            .expect("nothing arrived")
            .expect("sink dropped")
    }

    pub async fn message(&mut self) -> serde_json::Value {
        loop {
            match self.next().await {
                Out::Message(v) => return v,
                Out::Ping => continue,
            }
        }
    }

    pub fn hang_up(&mut self) {
        if let Some(tx) = self.hangup.take() {
            let _ = tx.send(());
        }
    }
}

pub fn channel_sink() -> (ChannelSink, Peer) {
    let (out, rx) = mpsc::unbounded_channel();
    let (hangup_tx, hangup_rx) = oneshot::channel();
    (
        ChannelSink {
            out,
            hangup: hangup_rx,
            fail_after: None,
            written: 0,
        },
        Peer {
            rx,
            hangup: Some(hangup_tx),
        },
    )
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send_message(&mut self, msg: &[u8]) -> transport::Result<()> {
        if self.fail_after.is_some_and(|n| self.written >= n) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone").into());
        }
        self.written += 1;
        let _ = self.out.send(Out::Message(serde_json::from_slice(msg)?));
        Ok(())
    }

    async fn send_ping(&mut self) -> transport::Result<()> {
        let _ = self.out.send(Out::Ping);
        Ok(())
    }

    async fn closed(&mut self) {
        let _ = (&mut self.hangup).await;
    }
}
