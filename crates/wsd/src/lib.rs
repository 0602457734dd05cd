//! wsd library crate.
//!
//! This crate provides the bootstrap layer of a WebSocket server: it binds the
//! listeners, optionally terminates TLS, hands accepted connections to a
//! connection handler, and runs the whole thing on a single-threaded reactor
//! with `on_create` / `on_start` / `on_stop` hooks for embedding code.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser ──TCP──▶ [wsd]
//!   ├── application/      Server lifecycle, hooks, Logger seam
//!   └── infrastructure/
//!         ├── reactor/     current-thread runtime + LocalSet
//!         ├── listener/    TCP listeners, Binder, ListenerGuard
//!         ├── tls/         TLS-terminating listener decorator (rustls)
//!         ├── handler/     ConnectionHandler + echo/policy handler
//!         ├── config_file/ TOML configuration
//!         └── mock/        in-memory test doubles
//! ```
//!
//! Pure types (configuration, lifecycle state machine, hook registry, policy
//! document) live in the `wsd-core` crate.
//!
//! # Layer rules
//!
//! - `wsd-core` has no I/O, no async runtime, no sockets.
//! - `application` orchestrates the lifecycle through the infrastructure
//!   traits (`Listener`, `Binder`, `Handshake`, `ConnectionHandler`); it
//!   never touches a socket itself.
//! - `infrastructure` owns all I/O: `tokio`, `rustls`, `tungstenite`.
//!
//! # For beginners: why a single thread?
//!
//! Every listener callback, hook and dispatch runs on the reactor's thread,
//! one at a time.  Nothing needs a `Mutex`, hooks can freely share `Rc`
//! state, and the order in which things happen is exactly the order in which
//! the loop processes them.

/// Application layer: server lifecycle and logging seam.
pub mod application;

/// Infrastructure layer: reactor, sockets, TLS, handlers, config file.
pub mod infrastructure;

pub use application::{
    HookResult, HookSlot, ListenerAddrs, ListenerRole, Logger, NullLogger, Server, ServerBuilder,
    ServerError, TracingLogger, WeakServer, SERVER_VERSION,
};
pub use infrastructure::{
    Binder, Connection, ConnectionHandler, ConnectionInfo, Listener, ListenerError, ListenerEvent,
    ListenerGuard, Reactor, ReactorError, SocketBinder, SocketListener, TlsListener, Transport,
    WebSocketHandler,
};
