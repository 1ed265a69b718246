//! Broadcast actions and payloads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `team id -> vault id -> vault version`, as seen by one connection.
pub type VaultVersionMap = BTreeMap<String, BTreeMap<String, i64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastAction {
    #[serde(rename = "secret:new")]
    SecretNew,
    #[serde(rename = "secret:change")]
    SecretChange,
    #[serde(rename = "secret:remove")]
    SecretRemove,
    /// Initial snapshot sent right after subscribing.
    #[serde(rename = "vault:version")]
    VaultVersion,
    /// Keepalive on the event stream.
    #[serde(rename = "ping")]
    Ping,
}

impl BroadcastAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretNew => "secret:new",
            Self::SecretChange => "secret:change",
            Self::SecretRemove => "secret:remove",
            Self::VaultVersion => "vault:version",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for BroadcastAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON document delivered to a transport.
///
/// `secret` is kept as a JSON value so this crate does not depend on the
/// storage models; the broadcaster fills it from whatever it was handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub action: BroadcastAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_version: Option<VaultVersionMap>,
}

impl BroadcastPayload {
    /// A change to one vault, optionally embedding the affected secret.
    pub fn change<S: Serialize + ?Sized>(
        action: BroadcastAction,
        team: &str,
        vault: &str,
        secret: Option<&S>,
    ) -> Result<Self, serde_json::Error> {
        let secret = secret.map(serde_json::to_value).transpose()?;
        Ok(Self {
            action,
            team: Some(team.to_owned()),
            vault: Some(vault.to_owned()),
            secret,
            vault_version: None,
        })
    }

    pub fn vault_versions(map: VaultVersionMap) -> Self {
        Self {
            action: BroadcastAction::VaultVersion,
            team: None,
            vault: None,
            secret: None,
            vault_version: Some(map),
        }
    }

    pub fn ping() -> Self {
        Self {
            action: BroadcastAction::Ping,
            team: None,
            vault: None,
            secret: None,
            vault_version: None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
