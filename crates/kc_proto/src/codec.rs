//! Event-stream framing.
//!
//! The event-stream transport takes over the raw connection, writes
//! `EVENT_STREAM_HEADERS` once, then one frame per payload:
//!
//!   id: <unix nanos>\nevent: message\ndata: <json>\n\n

use thiserror::Error;

pub const EVENT_STREAM_HEADERS: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Vary: Accept-Encoding\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
\r\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A newline inside `data:` would split the event.
    #[error("payload contains a line break")]
    LineBreak,
}

/// Encode one `message` event. `data` must be single-line JSON.
pub fn encode_event(id: i64, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.iter().any(|&b| b == b'\n' || b == b'\r') {
        return Err(CodecError::LineBreak);
    }
    let head = format!("id: {id}\nevent: message\ndata: ");
    let mut out = Vec::with_capacity(head.len() + data.len() + 2);
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\n\n");
    Ok(out)
}
