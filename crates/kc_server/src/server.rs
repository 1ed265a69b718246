//! Websocket endpoint.
//!
//! Every accepted TCP connection is upgraded, authenticated by its bearer
//! session and then handed to the listen loop until either side goes away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::service::Service;
use crate::transport::{broadcast_listen_loop, WsSink};

/// Credentials taken from the upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub session_id: String,
    pub agent: String,
}

impl Credentials {
    /// `Authorization: Bearer <session id>` plus `User-Agent` (may be empty).
    pub fn from_request(req: &Request) -> Option<Self> {
        let auth = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
        let session_id = auth.strip_prefix("Bearer ")?.trim();
        if session_id.is_empty() {
            return None;
        }
        let agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        Some(Self {
            session_id: session_id.to_owned(),
            agent: agent.to_owned(),
        })
    }
}

fn unauthorized() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("missing bearer session".into()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}

/// Accept until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    service: Arc<Service>,
    ping_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let service = service.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, service, ping_interval).await;
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, service: Arc<Service>, ping_interval: Duration) {
    let mut creds = None;
    let upgraded = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match Credentials::from_request(req) {
            Some(c) => {
                creds = Some(c);
                Ok(resp)
            }
            None => Err(unauthorized()),
        }
    })
    .await;
    let ws = match upgraded {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "upgrade refused");
            return;
        }
    };
    let Some(creds) = creds else {
        return;
    };

    let mut sink = WsSink::new(ws);
    let user = match service.authenticate(&creds.session_id, &creds.agent).await {
        Ok((_, user)) => user,
        Err(e) => {
            debug!(%peer, error = %e, "unknown session");
            sink.close().await;
            return;
        }
    };

    let connection_id = Uuid::new_v4().to_string();
    info!(%peer, user = %user.id, connection = %connection_id, "websocket connected");
    // errors are logged by the loop itself
    let _ = broadcast_listen_loop(&service, &user, &connection_id, &mut sink, ping_interval).await;
    sink.close().await;
    info!(%peer, connection = %connection_id, "websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut b = Request::builder().uri("/ws");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    #[test]
    fn bearer_and_agent_are_read() {
        let c = Credentials::from_request(&request(&[
            ("Authorization", "Bearer abc123"),
            ("User-Agent", "keycat-cli/2"),
        ]))
        .unwrap();
        assert_eq!(c.session_id, "abc123");
        assert_eq!(c.agent, "keycat-cli/2");
    }

    #[test]
    fn agent_is_optional() {
        let c = Credentials::from_request(&request(&[("Authorization", "Bearer abc123")])).unwrap();
        assert_eq!(c.agent, "");
    }

    #[test]
    fn other_schemes_are_refused() {
        assert!(Credentials::from_request(&request(&[])).is_none());
        assert!(Credentials::from_request(&request(&[("Authorization", "Basic Zm9vOmJhcg==")])).is_none());
        assert!(Credentials::from_request(&request(&[("Authorization", "Bearer   ")])).is_none());
    }
}
