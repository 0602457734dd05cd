//! In-memory test doubles for the server's injection seams.
//!
//! These are used by the unit tests in this crate and by the integration
//! tests under `tests/`, and are public so embedding applications can test
//! their own hooks the same way.
//!
//! | Double               | Replaces                                   |
//! |----------------------|--------------------------------------------|
//! | [`MockListener`]     | a listening socket; driven by a trigger    |
//! | [`RecordingBinder`]  | [`SocketBinder`]; records bind targets     |
//! | [`RecordingHandler`] | the WebSocket handler; records dispatches  |
//! | [`RecordingLogger`]  | the tracing logger; records messages       |
//!
//! [`SocketBinder`]: crate::infrastructure::listener::SocketBinder

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::duplex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use wsd_core::ConnectionId;

use crate::application::logger::Logger;
use crate::infrastructure::connection::{Connection, ConnectionInfo};
use crate::infrastructure::handler::ConnectionHandler;
use crate::infrastructure::listener::{
    Binder, EventSender, Listener, ListenerError, ListenerEvent, ListenerGuard,
};
use crate::infrastructure::reactor::Reactor;

// ── MockListener ──────────────────────────────────────────────────────────────

/// A listener whose events are injected by a [`ListenerTrigger`].
#[derive(Debug)]
pub struct MockListener {
    injected: UnboundedReceiver<ListenerEvent>,
    local_addr: Option<SocketAddr>,
}

/// Feeds events into a [`MockListener`].
#[derive(Debug, Clone)]
pub struct ListenerTrigger {
    tx: UnboundedSender<ListenerEvent>,
}

impl MockListener {
    /// Creates a listener with no address and the trigger that drives it.
    pub fn new() -> (Self, ListenerTrigger) {
        let (tx, injected) = mpsc::unbounded_channel();
        (
            Self {
                injected,
                local_addr: None,
            },
            ListenerTrigger { tx },
        )
    }

    /// Reports `addr` as the bound address.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }
}

impl Listener for MockListener {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn start(self: Box<Self>, reactor: &Reactor, events: EventSender) -> ListenerGuard {
        let mut injected = self.injected;
        let task = reactor.spawn(async move {
            while let Some(event) = injected.recv().await {
                if events.send(event).is_err() {
                    break;
                }
            }
        });
        ListenerGuard::new(self.local_addr, task)
    }
}

impl ListenerTrigger {
    /// Simulates an accepted connection.  Returns `false` once the listener
    /// has been closed.
    pub fn accept(&self, connection: Connection) -> bool {
        self.tx.send(ListenerEvent::Accepted(connection)).is_ok()
    }

    /// Simulates an accepted connection over an in-memory pipe and returns
    /// its id.  The client half of the pipe is dropped.
    pub fn accept_in_memory(&self) -> ConnectionId {
        let (server_side, _client_side) = duplex(1024);
        let connection = Connection::new(server_side, None);
        let id = connection.id();
        self.accept(connection);
        id
    }

    /// Simulates a listener-level error event.
    pub fn fail(&self, error: ListenerError) -> bool {
        self.tx.send(ListenerEvent::Failed(error)).is_ok()
    }

    /// `true` once the started listener has been torn down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── RecordingBinder ───────────────────────────────────────────────────────────

/// A binder that hands out [`MockListener`]s and remembers what was asked.
#[derive(Debug, Default)]
pub struct RecordingBinder {
    requests: RefCell<Vec<SocketAddr>>,
    triggers: RefCell<HashMap<SocketAddr, ListenerTrigger>>,
    occupied: RefCell<Vec<SocketAddr>>,
}

impl RecordingBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later bind of `addr` fail with `AddrInUse`.
    pub fn occupy(&self, addr: SocketAddr) {
        self.occupied.borrow_mut().push(addr);
    }

    /// Every address `bind` was called with, in call order.
    pub fn requested(&self) -> Vec<SocketAddr> {
        self.requests.borrow().clone()
    }

    /// The trigger of the most recent listener bound to `addr`.
    pub fn trigger(&self, addr: SocketAddr) -> Option<ListenerTrigger> {
        self.triggers.borrow().get(&addr).cloned()
    }
}

impl Binder for RecordingBinder {
    fn bind(&self, _reactor: &Reactor, addr: SocketAddr) -> Result<Box<dyn Listener>, ListenerError> {
        self.requests.borrow_mut().push(addr);

        if self.occupied.borrow().contains(&addr) {
            return Err(ListenerError::Bind {
                addr,
                source: io::Error::new(io::ErrorKind::AddrInUse, "address already in use"),
            });
        }

        let (listener, trigger) = MockListener::new();
        self.triggers.borrow_mut().insert(addr, trigger);
        Ok(Box::new(listener.with_local_addr(addr)))
    }
}

// ── RecordingHandler ──────────────────────────────────────────────────────────

/// Which handler entry point a connection was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerCall {
    Connect(ConnectionInfo),
    PolicyConnect(ConnectionInfo),
}

/// A connection handler that records dispatches and drops the connections.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: RefCell<Vec<HandlerCall>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ConnectionHandler for RecordingHandler {
    async fn handle_connect(&self, connection: Connection) {
        self.calls
            .borrow_mut()
            .push(HandlerCall::Connect(connection.info()));
    }

    async fn handle_policy_connect(&self, connection: Connection) {
        self.calls
            .borrow_mut()
            .push(HandlerCall::PolicyConnect(connection.info()));
    }
}

// ── RecordingLogger ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

/// A logger that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: RefCell<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.borrow().clone()
    }

    /// Messages logged at `level`, in order.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn record(&self, level: LogLevel, message: &str) {
        self.entries.borrow_mut().push((level, message.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.record(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.record(LogLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.record(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_binder_records_and_fails_occupied() {
        // Arrange
        let reactor = Reactor::new().unwrap();
        let binder = RecordingBinder::new();
        let free: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let taken: SocketAddr = "127.0.0.1:8843".parse().unwrap();
        binder.occupy(taken);

        // Act
        let ok = binder.bind(&reactor, free);
        let err = binder.bind(&reactor, taken);

        // Assert
        assert_eq!(ok.unwrap().local_addr(), Some(free));
        assert!(matches!(err, Err(ListenerError::Bind { .. })));
        assert_eq!(binder.requested(), vec![free, taken]);
        assert!(binder.trigger(free).is_some());
        assert!(binder.trigger(taken).is_none());
    }

    #[test]
    fn test_trigger_sees_closed_listener() {
        let reactor = Reactor::new().unwrap();
        let (listener, trigger) = MockListener::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let guard = Box::new(listener).start(&reactor, tx);
        assert!(!trigger.is_closed());

        drop(guard);
        reactor.block_on(tokio::task::yield_now());

        assert!(trigger.is_closed());
        assert!(!trigger.accept_in_memory().to_string().is_empty());
    }

    #[test]
    fn test_recording_logger_filters_by_level() {
        let logger = RecordingLogger::new();
        logger.debug("a");
        logger.error("b");
        logger.info("c");

        assert_eq!(logger.messages(LogLevel::Error), vec!["b".to_string()]);
        assert_eq!(logger.entries().len(), 3);
    }
}
