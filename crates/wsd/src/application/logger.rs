//! The logging seam of the server.
//!
//! The server reports its lifecycle banners and listener errors through a
//! [`Logger`] rather than calling `tracing` directly, so embedders can route
//! them anywhere and tests can assert on exactly what was logged.
//!
//! - [`NullLogger`] discards everything (the default).
//! - [`TracingLogger`] forwards to the `tracing` macros under the
//!   `wsd::server` target, where the binary's `EnvFilter` picks them up.

/// Leveled sink for server messages.
#[cfg_attr(test, mockall::automock)]
pub trait Logger {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "wsd::server", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "wsd::server", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "wsd::server", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loggers_are_usable_as_trait_objects() {
        let loggers: Vec<Box<dyn Logger>> = vec![Box::new(NullLogger), Box::new(TracingLogger)];
        for logger in &loggers {
            logger.debug("debug");
            logger.info("info");
            logger.error("error");
        }
    }
}
