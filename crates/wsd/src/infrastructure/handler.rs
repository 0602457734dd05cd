//! Connection handlers: what happens to a connection after it is accepted.
//!
//! The server owns the listeners and decides *which* entry point a
//! connection goes to; a [`ConnectionHandler`] decides what to *do* with it.
//!
//! | Listener | Entry point                                   |
//! |----------|-----------------------------------------------|
//! | primary  | [`ConnectionHandler::handle_connect`]         |
//! | policy   | [`ConnectionHandler::handle_policy_connect`]  |
//!
//! The bundled [`WebSocketHandler`] upgrades primary connections to
//! WebSocket sessions and echoes every data frame back to the sender, and
//! answers legacy `<policy-file-request/>` probes with a cross-domain policy
//! document.  Real applications implement the trait themselves.
//!
//! # Why `?Send`?
//!
//! Handlers run as local tasks on the single-threaded reactor, so their
//! futures may hold `Rc`/`RefCell` state.  `async_trait(?Send)` drops the
//! `Send` bound `async-trait` would otherwise put on the returned future.

use std::io;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use wsd_core::{is_policy_request, PolicyFile};

use crate::infrastructure::connection::Connection;

/// Upper bound on a policy request; anything longer is not one.
const MAX_POLICY_REQUEST: usize = 1024;

/// How long a policy client may take to send its request.
const POLICY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives connections accepted by the server's listeners.
#[async_trait(?Send)]
pub trait ConnectionHandler {
    /// A connection accepted by the primary listener (already TLS-negotiated
    /// when TLS is enabled).
    async fn handle_connect(&self, connection: Connection);

    /// A connection accepted by the legacy-policy listener.
    async fn handle_policy_connect(&self, connection: Connection);
}

/// Echoing WebSocket endpoint plus policy-file responder.
#[derive(Debug, Clone)]
pub struct WebSocketHandler {
    policy: Vec<u8>,
    policy_read_timeout: Duration,
}

impl WebSocketHandler {
    /// Creates a handler serving `policy` on the policy listener.
    pub fn new(policy: PolicyFile) -> Self {
        Self {
            policy: policy.to_wire(),
            policy_read_timeout: POLICY_READ_TIMEOUT,
        }
    }

    /// Overrides how long a policy client may take to send its request.
    pub fn with_policy_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.policy_read_timeout = read_timeout;
        self
    }

    /// Reads a policy request and answers it.
    ///
    /// Returns `Ok(false)` if the client sent something that is not a policy
    /// request; nothing is written back in that case.
    async fn serve_policy(&self, connection: &mut Connection) -> io::Result<bool> {
        let mut request = Vec::with_capacity(64);
        let mut chunk = [0u8; 256];

        let read = timeout(self.policy_read_timeout, async {
            loop {
                let n = connection.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request.contains(&0) || request.len() >= MAX_POLICY_REQUEST {
                    break;
                }
            }
            Ok::<_, io::Error>(())
        })
        .await;

        match read {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "policy request not received in time",
                ))
            }
        }

        if !is_policy_request(&request) {
            return Ok(false);
        }

        connection.write_all(&self.policy).await?;
        connection.flush().await?;
        Ok(true)
    }
}

impl Default for WebSocketHandler {
    fn default() -> Self {
        Self::new(PolicyFile::default())
    }
}

#[async_trait(?Send)]
impl ConnectionHandler for WebSocketHandler {
    async fn handle_connect(&self, connection: Connection) {
        let id = connection.id();
        match run_session(connection).await {
            Ok(()) => info!("session {id} closed normally"),
            Err(e) => warn!("session {id} closed with error: {e:#}"),
        }
    }

    async fn handle_policy_connect(&self, mut connection: Connection) {
        let id = connection.id();
        match self.serve_policy(&mut connection).await {
            Ok(true) => debug!("served policy file to {id}"),
            Ok(false) => debug!("{id} sent something other than a policy request; closing"),
            Err(e) => warn!("policy connection {id} failed: {e}"),
        }
        // Best effort: the peer may already be gone.
        let _ = connection.shutdown().await;
    }
}

/// Runs one WebSocket session: upgrade, then echo until the client closes.
async fn run_session(connection: Connection) -> anyhow::Result<()> {
    let id = connection.id();
    let peer = connection
        .peer()
        .map_or_else(|| "unknown peer".to_string(), |p| p.to_string());

    // `accept_async` reads the HTTP Upgrade request and answers with
    // "101 Switching Protocols"; from then on the stream speaks frames.
    let mut ws = accept_async(connection)
        .await
        .with_context(|| format!("WebSocket handshake failed for {id} ({peer})"))?;

    info!("WebSocket session {id} established with {peer}");

    while let Some(frame) = ws.next().await {
        match frame.with_context(|| format!("session {id}: read error"))? {
            msg @ (WsMessage::Text(_) | WsMessage::Binary(_)) => {
                ws.send(msg)
                    .await
                    .with_context(|| format!("session {id}: write error"))?;
            }
            // tungstenite answers pings and close frames itself; the stream
            // ends once the closing handshake has been flushed.
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(frame) => debug!("session {id}: close requested ({frame:?})"),
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_policy_request_is_answered_with_policy_document() {
        // Arrange: the mock expects the request, then exactly the NUL-terminated XML.
        let policy = PolicyFile::permissive();
        let expected = policy.to_wire();
        let stream = Builder::new()
            .read(b"<policy-file-request/>\0")
            .write(&expected)
            .build();
        let handler = WebSocketHandler::new(policy);

        // Act
        handler
            .handle_policy_connect(Connection::new(stream, None))
            .await;

        // Assert: the mock panics on drop if any expectation was not met.
    }

    #[tokio::test]
    async fn test_non_policy_payload_gets_no_answer() {
        let stream = Builder::new().read(b"GET / HTTP/1.1\r\n\r\n\0").build();
        let handler = WebSocketHandler::default();

        handler
            .handle_policy_connect(Connection::new(stream, None))
            .await;
    }

    #[tokio::test]
    async fn test_policy_request_split_across_reads() {
        let policy = PolicyFile::permissive();
        let expected = policy.to_wire();
        let stream = Builder::new()
            .read(b"<policy-file-")
            .read(b"request/>\0")
            .write(&expected)
            .build();

        WebSocketHandler::new(policy)
            .handle_policy_connect(Connection::new(stream, None))
            .await;
    }

    #[tokio::test]
    async fn test_silent_policy_client_times_out() {
        // Arrange: keep the client half open but never write.
        let (server_side, _client_side) = duplex(64);
        let handler =
            WebSocketHandler::default().with_policy_read_timeout(Duration::from_millis(20));
        let mut connection = Connection::new(server_side, None);

        // Act
        let result = handler.serve_policy(&mut connection).await;

        // Assert
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_websocket_session_echoes_text_and_binary() {
        // Arrange
        let (server_side, client_side) = duplex(4096);
        let handler = WebSocketHandler::default();

        let client = async move {
            let (mut ws, _response) = tokio_tungstenite::client_async("ws://localhost/", client_side)
                .await
                .unwrap();

            ws.send(WsMessage::Text("hello".into())).await.unwrap();
            let text = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::Binary(vec![1, 2, 3].into())).await.unwrap();
            let binary = ws.next().await.unwrap().unwrap();

            ws.close(None).await.unwrap();
            while ws.next().await.is_some() {}
            (text, binary)
        };

        // Act
        let ((), (text, binary)) =
            tokio::join!(handler.handle_connect(Connection::new(server_side, None)), client);

        // Assert
        assert_eq!(text, WsMessage::Text("hello".into()));
        assert_eq!(binary, WsMessage::Binary(vec![1, 2, 3].into()));
    }

    #[tokio::test]
    async fn test_non_websocket_client_is_dropped() {
        let (server_side, mut client_side) = duplex(1024);
        let handler = WebSocketHandler::default();

        let client = async move {
            client_side
                .write_all(b"hello, not http\r\n\r\n")
                .await
                .unwrap();
            let mut rest = Vec::new();
            // The handler drops the connection after the failed upgrade.
            let _ = client_side.read_to_end(&mut rest).await;
        };

        tokio::join!(handler.handle_connect(Connection::new(server_side, None)), client);
    }
}
