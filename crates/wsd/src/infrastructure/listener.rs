//! Listening sockets and the events they emit.
//!
//! A [`Listener`] is something that produces accepted connections.  Once
//! started on a [`Reactor`] it runs as a task and pushes one
//! [`ListenerEvent`] per accepted connection (or per failure) into an
//! unbounded channel owned by the server.  The server drains that channel in
//! order, which is what guarantees that connections from one listener are
//! dispatched in the order they were accepted.
//!
//! # Responsibilities
//!
//! - [`SocketListener`] – a real TCP listening socket.
//! - [`Binder`] / [`SocketBinder`] – turns a `SocketAddr` into a bound
//!   listener.  The server never binds sockets directly, which lets tests
//!   substitute a binder that records the requested addresses instead.
//! - [`ListenerGuard`] – keeps a started listener alive.  Dropping or
//!   closing the guard aborts the listener's tasks and closes its socket.
//!
//! Listener errors are *reported*, never fatal: an accept failure becomes a
//! [`ListenerEvent::Failed`] and the accept loop carries on.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;
use wsd_core::ConnectionId;

use crate::infrastructure::connection::Connection;
use crate::infrastructure::reactor::Reactor;

/// Pause after a failed `accept()` so a persistent error (e.g. the process
/// ran out of file descriptors) does not turn the loop into a busy spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for listener setup and accept-time failures.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The socket could not be bound or registered with the event loop.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `accept()` returned an error.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The TLS handshake of an accepted connection failed.
    #[error("TLS handshake failed for {connection}: {source}")]
    Handshake {
        connection: ConnectionId,
        #[source]
        source: io::Error,
    },

    /// The client did not complete the TLS handshake in time.
    #[error("TLS handshake timed out for {connection} after {timeout:?}")]
    HandshakeTimeout {
        connection: ConnectionId,
        timeout: Duration,
    },
}

/// Something a listener wants the server to know about.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A connection is ready for the handler.
    Accepted(Connection),
    /// A non-fatal failure; the listener stays open.
    Failed(ListenerError),
}

/// Sending half of the channel a started listener reports into.
pub type EventSender = UnboundedSender<ListenerEvent>;

/// A source of accepted connections.
pub trait Listener {
    /// The address the listener is bound to, if it has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Starts emitting events into `events` on `reactor`.
    ///
    /// The listener keeps running until the returned guard is dropped or
    /// closed, or until the receiving side of `events` goes away.
    fn start(self: Box<Self>, reactor: &Reactor, events: EventSender) -> ListenerGuard;
}

/// Creates listeners for bind targets.
pub trait Binder {
    /// Binds a listener to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if the address is unavailable.
    fn bind(&self, reactor: &Reactor, addr: SocketAddr) -> Result<Box<dyn Listener>, ListenerError>;
}

/// The production [`Binder`]: binds real TCP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketBinder;

impl Binder for SocketBinder {
    fn bind(&self, reactor: &Reactor, addr: SocketAddr) -> Result<Box<dyn Listener>, ListenerError> {
        Ok(Box::new(SocketListener::bind(reactor, addr)?))
    }
}

// ── ListenerGuard ─────────────────────────────────────────────────────────────

/// Ownership token for a started listener.
///
/// Holds the `JoinHandle`s of every task that makes up the listener (the
/// accept loop, a TLS relay, the server's dispatcher).  Aborting those tasks
/// drops the futures, and with them the listening socket.
#[derive(Debug)]
pub struct ListenerGuard {
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerGuard {
    pub fn new(local_addr: Option<SocketAddr>, task: JoinHandle<()>) -> Self {
        Self {
            local_addr,
            tasks: vec![task],
        }
    }

    /// Ties another task's lifetime to this listener.
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops the listener.  Equivalent to dropping the guard.
    pub fn close(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ── SocketListener ────────────────────────────────────────────────────────────

/// A bound TCP listening socket.
#[derive(Debug)]
pub struct SocketListener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl SocketListener {
    /// Binds `addr` synchronously and registers the socket with `reactor`.
    ///
    /// Binding happens immediately (before the loop runs) so that an
    /// occupied port is reported by `create()` rather than discovered later.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Bind`] if the port is in use, the address is
    /// not local, or the process lacks permission (e.g. ports below 1024).
    pub fn bind(reactor: &Reactor, addr: SocketAddr) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind { addr, source };

        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;

        // `from_std` must run inside the runtime so the socket is registered
        // with this reactor's I/O driver.
        let _context = reactor.enter();
        let inner = TcpListener::from_std(std_listener).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        debug!("bound listener on {local_addr}");
        Ok(Self { inner, local_addr })
    }
}

impl Listener for SocketListener {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn start(self: Box<Self>, reactor: &Reactor, events: EventSender) -> ListenerGuard {
        let local_addr = self.local_addr;
        let task = reactor.spawn(accept_loop(self.inner, events));
        ListenerGuard::new(Some(local_addr), task)
    }
}

/// Accepts connections until the event receiver goes away.
async fn accept_loop(listener: TcpListener, events: EventSender) {
    loop {
        let (event, failed) = match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("accepted connection from {peer}");
                // Small WebSocket frames should not wait for Nagle coalescing.
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not set TCP_NODELAY for {peer}: {e}");
                }
                (ListenerEvent::Accepted(Connection::new(stream, Some(peer))), false)
            }
            Err(e) => (ListenerEvent::Failed(ListenerError::Accept(e)), true),
        };

        if events.send(event).is_err() {
            debug!("listener event receiver dropped; stopping accept loop");
            break;
        }
        if failed {
            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
