//! Daemon configuration: an optional TOML file, every field defaulted.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use kc_broadcast::BroadcastConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "keycat";
pub const APP_NAME: &str = "keycatd";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub listen: ListenConfig,
    pub broadcast: BroadcastSettings,
    pub mail: MailConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("keycat.db"),
            max_connections: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub addr: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 23764)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    pub source_capacity: usize,
    /// 0 lets one stalled connection hold up every other one.
    pub delivery_timeout_ms: u64,
    pub ping_interval_secs: u64,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            source_capacity: 5,
            delivery_timeout_ms: 1000,
            ping_interval_secs: 30,
        }
    }
}

impl BroadcastSettings {
    pub fn engine(&self) -> BroadcastConfig {
        BroadcastConfig {
            source_capacity: self.source_capacity,
            delivery_timeout: (self.delivery_timeout_ms > 0)
                .then(|| Duration::from_millis(self.delivery_timeout_ms)),
            ..BroadcastConfig::default()
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailMode {
    #[default]
    Log,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub mode: MailMode,
    pub default_locale: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            mode: MailMode::Log,
            default_locale: "en".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".into() }
    }
}

impl ServerConfig {
    /// Defaults when `path` is `None`; a named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Per-user data directory, or the working directory when none can be found.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
