//! Infrastructure layer for wsd.
//!
//! The infrastructure layer handles all I/O: running the event loop, binding
//! listening sockets, terminating TLS and speaking WebSocket.
//!
//! # Responsibilities
//!
//! - Running the single-threaded reactor
//! - Binding TCP listeners and reporting accept events and errors
//! - Wrapping the primary listener in a TLS-terminating decorator
//! - Upgrading connections to WebSocket sessions and answering policy probes
//! - Loading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Lifecycle ordering and hook invocation (that is the application layer)
//! - Configuration validation and bind-target rules (that is `wsd-core`)

pub mod config_file;
pub mod connection;
pub mod handler;
pub mod listener;
pub mod mock;
pub mod reactor;
pub mod tls;

pub use connection::{AsyncStream, BoxedStream, Connection, ConnectionInfo, Transport};
pub use handler::{ConnectionHandler, WebSocketHandler};
pub use listener::{
    Binder, EventSender, Listener, ListenerError, ListenerEvent, ListenerGuard, SocketBinder,
    SocketListener,
};
pub use reactor::{Reactor, ReactorError};
pub use tls::{load_acceptor, Handshake, TlsError, TlsListener};
