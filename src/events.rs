//! Session lifecycle notifications surfaced to the application layer

use serde::{Deserialize, Serialize};

/// Notifications emitted by the session registry
///
/// `Connected` and `Disconnected` are driven solely by the connection-state
/// observer on the underlying peer connection, never by the command
/// handlers. `Error` is emitted on any failure path and always carries the
/// originating peer so the application can disambiguate concurrent calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The connection to a peer was established
    Connected {
        /// Remote peer identifier
        peer_id: String,
    },

    /// The connection to a peer was lost or closed
    ///
    /// Transport-level "disconnected", "failed", and "closed" are reported
    /// identically; the notification layer does not distinguish a graceful
    /// close from a failure.
    Disconnected {
        /// Remote peer identifier
        peer_id: String,
    },

    /// A failure scoped to one peer's session
    Error {
        /// Remote peer identifier
        peer_id: String,
        /// Human-readable error message
        message: String,
    },
}

impl SessionEvent {
    /// Get the peer this event concerns
    pub fn peer_id(&self) -> &str {
        match self {
            SessionEvent::Connected { peer_id }
            | SessionEvent::Disconnected { peer_id }
            | SessionEvent::Error { peer_id, .. } => peer_id,
        }
    }
}
