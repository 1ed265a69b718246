//! Live transports: one listen loop, two sinks.
//!
//! A connection subscribes, receives a `vault:version` snapshot of every
//! vault it can see, then gets the broadcasts for those vaults only, with a
//! ping whenever it has been quiet for the ping interval. The visible set is
//! fixed at subscribe time; access granted later shows up after a reconnect.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kc_broadcast::{BroadcastError, Subscription};
use kc_proto::{encode_event, BroadcastPayload, CodecError, VaultVersionMap, EVENT_STREAM_HEADERS};
use kc_store::{Clock, StoreError, User};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::service::Service;

/// Deadline for one event-stream write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("write timed out")]
    WriteTimeout,
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Where a connection's events go.
#[async_trait]
pub trait EventSink: Send {
    async fn send_message(&mut self, msg: &[u8]) -> Result<()>;

    async fn send_ping(&mut self) -> Result<()>;

    /// Resolves once the peer has gone away. Must be cancel-safe.
    async fn closed(&mut self) {
        future::pending::<()>().await
    }
}

/// Subscribe `connection_id`, then serve it until the peer leaves or a write
/// fails. The subscription is always released; a newer one under the same id
/// is left alone.
pub async fn broadcast_listen_loop<S>(
    service: &Service,
    user: &User,
    connection_id: &str,
    sink: &mut S,
    ping_interval: Duration,
) -> Result<()>
where
    S: EventSink + ?Sized,
{
    let mut sub = match service.broadcaster().subscribe(connection_id).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!(connection = %connection_id, user = %user.id, error = %e, "subscribe refused");
            return Err(e.into());
        }
    };
    let res = listen(service, user, &mut sub, sink, ping_interval).await;
    service.broadcaster().release(&sub);
    match &res {
        Ok(()) => debug!(connection = %connection_id, user = %user.id, "listener finished"),
        Err(e) => warn!(connection = %connection_id, user = %user.id, error = %e, "listener dropped"),
    }
    res
}

async fn listen<S>(
    service: &Service,
    user: &User,
    sub: &mut Subscription,
    sink: &mut S,
    ping_interval: Duration,
) -> Result<()>
where
    S: EventSink + ?Sized,
{
    // already subscribed, so nothing committed after this read is lost
    let connection_id = sub.id().to_owned();
    let visible = service.vault_versions(user).await?;
    sink.send_message(&BroadcastPayload::vault_versions(visible.clone()).to_bytes()?)
        .await?;
    debug!(connection = %connection_id, teams = visible.len(), "listener subscribed");

    let idle = tokio::time::sleep(ping_interval);
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => {
                sink.send_ping().await?;
                idle.as_mut().reset(Instant::now() + ping_interval);
            }
            next = sub.recv() => {
                let Some(broadcast) = next else {
                    debug!(connection = %connection_id, "subscription closed");
                    return Ok(());
                };
                if !sees(&visible, &broadcast.team, &broadcast.vault) {
                    continue;
                }
                sink.send_message(&broadcast.message).await?;
                idle.as_mut().reset(Instant::now() + ping_interval);
            }
            _ = sink.closed() => return Ok(()),
        }
    }
}

fn sees(visible: &VaultVersionMap, team: &str, vault: &str) -> bool {
    visible.get(team).is_some_and(|vaults| vaults.contains_key(vault))
}

// ── Event stream ────────────────────────────────────────────────────────────

/// Event-stream framing over a raw, already-taken-over connection.
pub struct SseSink<T> {
    io: T,
    clock: Arc<dyn Clock>,
}

impl<T> SseSink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Write the response head and hand back the sink.
    pub async fn start(mut io: T, clock: Arc<dyn Clock>) -> Result<Self> {
        write_bounded(&mut io, EVENT_STREAM_HEADERS.as_bytes()).await?;
        Ok(Self { io, clock })
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    async fn send_payload(&mut self, data: &[u8]) -> Result<()> {
        let id = self.clock.now().timestamp_nanos_opt().unwrap_or_default();
        let frame = encode_event(id, data)?;
        write_bounded(&mut self.io, &frame).await
    }
}

async fn write_bounded<T: AsyncWrite + Unpin>(io: &mut T, bytes: &[u8]) -> Result<()> {
    timeout(WRITE_TIMEOUT, async {
        io.write_all(bytes).await?;
        io.flush().await
    })
    .await
    .map_err(|_| TransportError::WriteTimeout)??;
    Ok(())
}

#[async_trait]
impl<T> EventSink for SseSink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_message(&mut self, msg: &[u8]) -> Result<()> {
        self.send_payload(msg).await
    }

    async fn send_ping(&mut self) -> Result<()> {
        let ping = BroadcastPayload::ping().to_bytes()?;
        self.send_payload(&ping).await
    }

    async fn closed(&mut self) {
        let mut buf = [0u8; 256];
        loop {
            match self.io.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                // the client has nothing to say on this stream
                Ok(_) => continue,
            }
        }
    }
}

// ── Websocket ───────────────────────────────────────────────────────────────

/// Text frames for payloads, ping frames for keepalive.
pub struct WsSink<T> {
    ws: WebSocketStream<T>,
}

impl<T> WsSink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ws: WebSocketStream<T>) -> Self {
        Self { ws }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[async_trait]
impl<T> EventSink for WsSink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_message(&mut self, msg: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(msg).into_owned();
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.ws.send(Message::Ping(vec![1])).await?;
        Ok(())
    }

    async fn closed(&mut self) {
        // reading also answers the peer's pings
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }
}
