//! Domain layer: pure value types with no I/O.
//!
//! - [`config`] – the immutable server configuration and its bind targets.
//! - [`lifecycle`] – the guarded `Uncreated → Created → Running → Stopped`
//!   state machine.
//! - [`connection_id`] – identifiers for accepted connections.

pub mod config;
pub mod connection_id;
pub mod lifecycle;
