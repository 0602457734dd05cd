//! End-to-end tests over real loopback sockets.
//!
//! Each test builds a server on `127.0.0.1`, runs it on the test thread, and
//! drives a client from a second thread.  When the client is done, a reactor
//! task spawned from an `on_start` hook calls `stop()`, which makes `run()`
//! return.
//!
//! The policy listener's well-known ports (843/8843) are remapped to
//! ephemeral ports by [`LoopbackBinder`] so the tests never depend on those
//! ports being free.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use wsd::infrastructure::listener::{Binder, Listener, ListenerError, SocketListener};
use wsd::{Reactor, Server, ServerError, WebSocketHandler};
use wsd_core::{LifecycleState, PolicyFile, ServerConfig, TlsSettings, POLICY_PORT, FALLBACK_POLICY_PORT};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Binds real sockets, moving the policy ports to ephemeral ones.
#[derive(Default)]
struct LoopbackBinder {
    requests: RefCell<Vec<SocketAddr>>,
}

impl LoopbackBinder {
    fn requested(&self) -> Vec<SocketAddr> {
        self.requests.borrow().clone()
    }
}

impl Binder for LoopbackBinder {
    fn bind(&self, reactor: &Reactor, addr: SocketAddr) -> Result<Box<dyn Listener>, ListenerError> {
        self.requests.borrow_mut().push(addr);
        let target = if addr.port() == POLICY_PORT || addr.port() == FALLBACK_POLICY_PORT {
            SocketAddr::new("127.0.0.1".parse().unwrap(), 0)
        } else {
            addr
        };
        Ok(Box::new(SocketListener::bind(reactor, target)?))
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn loopback(port: u16) -> ServerConfig {
    ServerConfig::new("127.0.0.1".parse().unwrap(), port)
}

fn build(reactor: &Rc<Reactor>, config: ServerConfig, binder: Rc<LoopbackBinder>) -> Server {
    let handler = Rc::new(WebSocketHandler::new(PolicyFile::permissive()));
    Server::builder(Rc::clone(reactor), config, handler)
        .binder(binder)
        .build()
}

/// Runs `server` until `client` (executed on its own thread) returns.
fn run_with_client<T, F>(server: &Server, client: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    let done_rx = RefCell::new(Some(done_rx));
    let outcome = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&outcome);

    server.on_start(move |reactor, server| {
        let done = done_rx
            .borrow_mut()
            .take()
            .ok_or_else(|| anyhow::anyhow!("server started twice"))?;
        let server = server.clone();
        let slot = Rc::clone(&slot);
        reactor.spawn(async move {
            *slot.borrow_mut() = Some(done.await);
            let _ = server.stop();
        });
        Ok(())
    });

    std::thread::spawn(move || {
        let _ = done_tx.send(client());
    });

    server.run().unwrap();
    let value = outcome.borrow_mut().take();
    value
        .expect("stop task did not run")
        .expect("client thread panicked")
}

fn client_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_websocket_echo_over_loopback() {
    // Arrange
    let reactor = Rc::new(Reactor::new().unwrap());
    let server = build(&reactor, loopback(0), Rc::new(LoopbackBinder::default()));
    server.create(None).unwrap();
    let primary = server.listener_addrs().unwrap().primary.unwrap();

    // Act
    let reply = run_with_client(&server, move || {
        client_runtime().block_on(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{primary}/"))
                .await
                .unwrap();
            ws.send(Message::Text("hello over loopback".into()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            reply
        })
    });

    // Assert
    assert_eq!(reply, Message::Text("hello over loopback".into()));
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[test]
fn test_policy_file_served_over_loopback() {
    // Arrange
    let reactor = Rc::new(Reactor::new().unwrap());
    let binder = Rc::new(LoopbackBinder::default());
    let server = build(&reactor, loopback(0), Rc::clone(&binder));
    server.create(None).unwrap();
    let policy = server.listener_addrs().unwrap().policy.unwrap();

    // Act
    let reply = run_with_client(&server, move || {
        let mut stream = TcpStream::connect(policy).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(b"<policy-file-request/>\0").unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).unwrap();
        reply
    });

    // Assert
    assert_eq!(reply, PolicyFile::permissive().to_wire());
    assert_eq!(
        binder.requested(),
        vec![
            "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            "127.0.0.1:8843".parse::<SocketAddr>().unwrap(),
        ]
    );
}

#[test]
fn test_tls_websocket_echo_over_loopback() {
    // Arrange
    let reactor = Rc::new(Reactor::new().unwrap());
    let tls = TlsSettings::new(fixture("cert.pem"), fixture("key.pem"));
    let config = ServerConfig::with_tls("127.0.0.1".parse().unwrap(), 0, tls).unwrap();
    let server = build(&reactor, config, Rc::new(LoopbackBinder::default()));
    server.create(None).unwrap();
    let primary = server.listener_addrs().unwrap().primary.unwrap();
    let cert_path = fixture("cert.pem");

    // Act
    let reply = run_with_client(&server, move || {
        let mut roots = rustls::RootCertStore::empty();
        let mut pem = BufReader::new(File::open(cert_path).unwrap());
        for cert in rustls_pemfile::certs(&mut pem) {
            roots.add(cert.unwrap()).unwrap();
        }
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        client_runtime().block_on(async move {
            let tcp = tokio::net::TcpStream::connect(primary).await.unwrap();
            let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
            let tls = connector.connect(name, tcp).await.unwrap();
            let (mut ws, _) = tokio_tungstenite::client_async("wss://localhost/", tls)
                .await
                .unwrap();
            ws.send(Message::Binary(vec![0xde, 0xad, 0xbe, 0xef].into()))
                .await
                .unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            reply
        })
    });

    // Assert
    assert_eq!(reply, Message::Binary(vec![0xde, 0xad, 0xbe, 0xef].into()));
}

#[test]
fn test_plaintext_client_on_tls_port_does_not_stop_server() {
    // Arrange: a client that skips the TLS handshake and then disconnects.
    let reactor = Rc::new(Reactor::new().unwrap());
    let tls = TlsSettings::new(fixture("cert.pem"), fixture("key.pem"))
        .with_handshake_timeout(Duration::from_secs(2));
    let config = ServerConfig::with_tls("127.0.0.1".parse().unwrap(), 0, tls).unwrap();
    let server = build(&reactor, config, Rc::new(LoopbackBinder::default()));
    server.create(None).unwrap();
    let primary = server.listener_addrs().unwrap().primary.unwrap();

    // Act
    let connected_again = run_with_client(&server, move || {
        let mut bad = TcpStream::connect(primary).unwrap();
        bad.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        bad.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut sink = Vec::new();
        let _ = bad.read_to_end(&mut sink);
        TcpStream::connect(primary).is_ok()
    });

    // Assert: the listener survived the failed handshake.
    assert!(connected_again);
}

#[test]
fn test_occupied_port_fails_create_before_hooks() {
    // Arrange
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap();
    let reactor = Rc::new(Reactor::new().unwrap());
    let server = build(&reactor, loopback(taken.port()), Rc::new(LoopbackBinder::default()));
    let fired = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&fired);
    server.on_create(move |_| {
        *flag.borrow_mut() = true;
        Ok(())
    });

    // Act
    let result = server.create(None);

    // Assert
    assert!(matches!(result, Err(ServerError::Listener { .. })));
    assert!(!*fired.borrow());
    assert_eq!(server.state(), LifecycleState::Uncreated);
}

#[test]
fn test_repeated_create_stop_cycles_reuse_the_port() {
    // Arrange: first server on an ephemeral port.
    let reactor = Rc::new(Reactor::new().unwrap());
    let first = build(&reactor, loopback(0), Rc::new(LoopbackBinder::default()));
    first.create(None).unwrap();
    let port = first.listener_addrs().unwrap().primary.unwrap().port();
    run_with_client(&first, || ());

    // Act: a new server on the same reactor binds the very same port.
    let second = build(&reactor, loopback(port), Rc::new(LoopbackBinder::default()));
    let result = second.create(None);

    // Assert
    assert!(result.is_ok(), "port {port} still held: {result:?}");
    assert_eq!(
        second.listener_addrs().unwrap().primary.unwrap().port(),
        port
    );
    run_with_client(&second, || ());
    assert_eq!(second.state(), LifecycleState::Stopped);
}
