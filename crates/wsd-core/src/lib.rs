//! # wsd-core
//!
//! Shared library for the wsd WebSocket server containing the configuration
//! value object, the server lifecycle state machine, the ordered hook
//! registry, and the legacy cross-domain policy document.
//!
//! This crate is used by the `wsd` server crate and by anything that embeds
//! it.  It has zero dependencies on sockets, TLS libraries, or async runtimes.
//!
//! # Architecture overview (for beginners)
//!
//! `wsd` is a *bootstrap layer* for a WebSocket server: it binds the network
//! listeners, forwards every accepted connection to a connection handler, and
//! lets the embedding application hook into three points of the server's life
//! (created, started, stopped).
//!
//! This crate (`wsd-core`) is the pure foundation.  It defines:
//!
//! - **`domain`** – What the server *is*: its immutable [`ServerConfig`], the
//!   explicit [`LifecycleState`] machine, and the [`ConnectionId`] that
//!   follows every accepted stream through the logs.
//!
//! - **`hooks`** – The append-only, ordered multi-callback slot
//!   ([`HookRegistry`]) behind `on_create`, `on_start` and `on_stop`.
//!
//! - **`policy`** – The cross-domain policy XML served on the auxiliary
//!   listener to legacy (pre-WebSocket) browser plugins.

pub mod domain;
pub mod hooks;
pub mod policy;

// Re-export the most-used types at the crate root so callers can write
// `wsd_core::ServerConfig` instead of `wsd_core::domain::config::ServerConfig`.
pub use domain::config::{
    ConfigError, ServerConfig, TlsSettings, DEFAULT_HANDSHAKE_TIMEOUT, FALLBACK_POLICY_PORT,
    INSECURE_WEB_PORT, POLICY_PORT,
};
pub use domain::connection_id::ConnectionId;
pub use domain::lifecycle::{LifecycleError, LifecycleOperation, LifecycleState};
pub use hooks::HookRegistry;
pub use policy::{is_policy_request, PolicyError, PolicyFile, SiteControl, POLICY_REQUEST};
