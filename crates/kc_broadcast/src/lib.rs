//! kc_broadcast — Fan-out of committed vault changes to live connections
//!
//! One dispatcher task owns the subscriber table. Everything else reaches it
//! through channels: registration and shutdown share a control channel,
//! unsubscribes have their own so they are still heard while the dispatcher
//! is blocked on a slow subscriber.
//!
//! # Modules
//! - `engine` — `Broadcaster` handle, dispatcher loop, per-connection `Subscription`

pub mod engine;

pub use engine::{Broadcast, BroadcastConfig, BroadcastError, BroadcastStats, Broadcaster, Subscription};
