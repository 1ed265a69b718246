//! kc_server — Service layer and live transports for Keycat
//!
//! Wraps the store so that every committed change is announced to live
//! connections, and carries the pieces the `keycatd` binary is made of.
//!
//! # Modules
//! - `config`    — TOML daemon configuration with defaults
//! - `mailer`    — confirmation / invitation mail seam
//! - `server`    — websocket endpoint with bearer-session upgrade
//! - `service`   — store calls followed by broadcasts and mail
//! - `telemetry` — tracing subscriber setup
//! - `transport` — listen loop, event-stream and websocket sinks

pub mod config;
pub mod mailer;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod transport;

pub use config::ServerConfig;
pub use mailer::{LogMailer, MailError, Mailer, NullMailer};
pub use service::Service;
pub use transport::{broadcast_listen_loop, EventSink, SseSink, TransportError, WsSink};
