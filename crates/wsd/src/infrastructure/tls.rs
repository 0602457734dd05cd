//! TLS termination for the primary listener.
//!
//! [`TlsListener`] is a decorator: it starts an inner [`Listener`], takes each
//! accepted plaintext connection, runs the TLS handshake on it, and only then
//! forwards it to the server as a [`Transport::Tls`] connection.  The server's
//! dispatch code never sees a connection whose handshake has not completed.
//!
//! Handshakes run concurrently (one local task each), so a slow or malicious
//! client cannot hold up the clients accepted after it.  TLS connections
//! therefore reach the server in the order their handshakes complete, not
//! the order the inner listener accepted them.  Every handshake is
//! bounded by a timeout; a failed or timed-out handshake is reported as a
//! [`ListenerEvent::Failed`] and the connection is dropped.
//!
//! The handshake itself is behind the [`Handshake`] trait.  Production code
//! uses `tokio_rustls::TlsAcceptor` (built by [`load_acceptor`] from PEM
//! files); tests inject a fake to exercise the ordering rules without
//! certificates.
//!
//! [`Transport::Tls`]: crate::infrastructure::connection::Transport::Tls

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::debug;
use wsd_core::TlsSettings;

use crate::infrastructure::connection::Connection;
use crate::infrastructure::listener::{
    EventSender, Listener, ListenerError, ListenerEvent, ListenerGuard,
};
use crate::infrastructure::reactor::Reactor;

/// Error type for loading certificate material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Builds a rustls acceptor from the PEM files named in `settings`.
///
/// # Errors
///
/// Returns a [`TlsError`] if a file is unreadable, contains no usable item,
/// or the key does not match the certificate.
pub fn load_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(settings.cert_path())?;
    let key = load_private_key(settings.key_path())?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

// ── Handshake seam ────────────────────────────────────────────────────────────

/// Performs the server side of a TLS handshake.
#[async_trait(?Send)]
pub trait Handshake {
    /// Negotiates TLS on `connection` and returns the secured connection.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that aborted the handshake.
    async fn negotiate(&self, connection: Connection) -> io::Result<Connection>;
}

#[async_trait(?Send)]
impl Handshake for TlsAcceptor {
    async fn negotiate(&self, connection: Connection) -> io::Result<Connection> {
        let (info, stream) = connection.into_parts();
        let secured = self.accept(stream).await?;
        Ok(Connection::from_parts(info.secured(), Box::new(secured)))
    }
}

// ── TlsListener ───────────────────────────────────────────────────────────────

/// A listener that hands out only TLS-negotiated connections.
pub struct TlsListener {
    inner: Box<dyn Listener>,
    handshake: Rc<dyn Handshake>,
    timeout: Duration,
}

impl TlsListener {
    pub fn new(inner: Box<dyn Listener>, handshake: Rc<dyn Handshake>, timeout: Duration) -> Self {
        Self {
            inner,
            handshake,
            timeout,
        }
    }
}

impl Listener for TlsListener {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    fn start(self: Box<Self>, reactor: &Reactor, events: EventSender) -> ListenerGuard {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.start(reactor, raw_tx);
        let relay = reactor.spawn(terminate(raw_rx, events, self.handshake, self.timeout));
        guard.push(relay);
        guard
    }
}

/// Runs handshakes for raw connections and forwards the results.
///
/// Dropping this task (when the guard closes) drops the `JoinSet`, which
/// aborts every handshake still in flight.
async fn terminate(
    mut raw: UnboundedReceiver<ListenerEvent>,
    events: EventSender,
    handshake: Rc<dyn Handshake>,
    timeout: Duration,
) {
    let mut pending = JoinSet::new();

    loop {
        tokio::select! {
            event = raw.recv() => match event {
                Some(ListenerEvent::Accepted(connection)) => {
                    let handshake = Rc::clone(&handshake);
                    let events = events.clone();
                    pending.spawn_local(async move {
                        let event = secure(handshake.as_ref(), connection, timeout).await;
                        // The receiver only disappears during shutdown.
                        let _ = events.send(event);
                    });
                }
                Some(failed @ ListenerEvent::Failed(_)) => {
                    if events.send(failed).is_err() {
                        break;
                    }
                }
                None => break,
            },
            Some(_) = pending.join_next(), if !pending.is_empty() => {}
        }
    }
}

async fn secure(handshake: &dyn Handshake, connection: Connection, timeout: Duration) -> ListenerEvent {
    let id = connection.id();
    match tokio::time::timeout(timeout, handshake.negotiate(connection)).await {
        Ok(Ok(secured)) => {
            debug!("TLS handshake complete for {id}");
            ListenerEvent::Accepted(secured)
        }
        Ok(Err(source)) => ListenerEvent::Failed(ListenerError::Handshake {
            connection: id,
            source,
        }),
        Err(_) => ListenerEvent::Failed(ListenerError::HandshakeTimeout {
            connection: id,
            timeout,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
