//! kc_proto — Wire types shared by the broadcast engine and its transports
//!
//! Everything pushed to a live connection is a JSON `BroadcastPayload`. The
//! engine serializes once per broadcast; transports forward the bytes as-is.
//!
//! # Modules
//! - `broadcast` — actions, payload, per-connection vault version snapshot
//! - `codec`     — event-stream (SSE) response head and frame encoding

pub mod broadcast;
pub mod codec;

pub use broadcast::{BroadcastAction, BroadcastPayload, VaultVersionMap};
pub use codec::{encode_event, CodecError, EVENT_STREAM_HEADERS};
