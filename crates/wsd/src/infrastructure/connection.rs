//! The accepted-connection type handed from listeners to the handler.
//!
//! A [`Connection`] is a boxed bidirectional byte stream plus the metadata
//! the server knows about it ([`ConnectionInfo`]).  Listeners create it from
//! a raw `TcpStream`; the TLS layer swaps the stream for a `TlsStream` while
//! keeping the same [`ConnectionId`], so log lines stay correlated.
//!
//! `Connection` itself implements `AsyncRead + AsyncWrite`, which means a
//! handler can pass it straight to `tokio_tungstenite::accept_async` or use
//! `AsyncReadExt`/`AsyncWriteExt` on it.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use wsd_core::ConnectionId;

/// Any stream a connection can be carried over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Whether the stream has been through TLS termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Plain,
    Tls,
}

/// Metadata describing an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    /// Remote address, when the transport has one (in-memory test streams do not).
    pub peer: Option<SocketAddr>,
    pub transport: Transport,
}

impl ConnectionInfo {
    /// Same connection, marked as TLS-terminated.
    pub fn secured(self) -> Self {
        Self {
            transport: Transport::Tls,
            ..self
        }
    }
}

/// A bidirectional stream accepted by a listener.
pub struct Connection {
    info: ConnectionInfo,
    stream: BoxedStream,
}

impl Connection {
    /// Wraps a freshly accepted plaintext stream under a new id.
    pub fn new(stream: impl AsyncStream + 'static, peer: Option<SocketAddr>) -> Self {
        Self {
            info: ConnectionInfo {
                id: ConnectionId::new(),
                peer,
                transport: Transport::Plain,
            },
            stream: Box::new(stream),
        }
    }

    /// Reassembles a connection, typically after replacing its stream.
    pub fn from_parts(info: ConnectionInfo, stream: BoxedStream) -> Self {
        Self { info, stream }
    }

    /// Splits the connection into its metadata and its stream.
    pub fn into_parts(self) -> (ConnectionInfo, BoxedStream) {
        (self.info, self.stream)
    }

    pub fn info(&self) -> ConnectionInfo {
        self.info
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.info.peer
    }

    pub fn transport(&self) -> Transport {
        self.info.transport
    }

    /// `true` if the stream carries TLS-decrypted bytes.
    pub fn is_secure(&self) -> bool {
        self.info.transport == Transport::Tls
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.info.id)
            .field("peer", &self.info.peer)
            .field("transport", &self.info.transport)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
