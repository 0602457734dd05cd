//! Application layer for wsd.
//!
//! The application layer orchestrates the server: it knows *what* happens at
//! each lifecycle step, but delegates *how* (binding, TLS, WebSocket framing)
//! to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - The `Server` lifecycle (`create` / `run` / `stop`) and its hooks
//! - Dispatching accepted connections to the connection handler
//! - The `Logger` contract used for lifecycle banners and listener errors
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - TLS handshakes and WebSocket framing (rustls, tokio-tungstenite)

pub mod logger;
pub mod server;

pub use logger::{Logger, NullLogger, TracingLogger};
pub use server::{
    HookResult, HookSlot, ListenerAddrs, ListenerRole, Server, ServerBuilder, ServerError,
    WeakServer, SERVER_VERSION,
};
