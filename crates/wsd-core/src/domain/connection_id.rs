//! Identifiers for accepted connections.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier assigned to every accepted connection.
///
/// The id is attached when a listener accepts the raw stream and survives the
/// TLS handshake, so log lines from the listener, the TLS layer and the
/// connection handler can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a new random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is enough to tell sessions apart in a log.
        let simple = self.0.simple().to_string();
        write!(f, "conn-{}", &simple[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_display_uses_short_prefix() {
        let id = ConnectionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("conn-"));
        assert_eq!(shown.len(), "conn-".len() + 8);
    }
}
