//! Signaling message types and the relay seam
//!
//! The relay transport itself (chat connection, WebSocket, QR code, ...)
//! is external; this module only defines the payloads the core emits and
//! the trait through which they leave the process. Delivery is assumed
//! reliable and ordered per peer-pair.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Signaling payloads exchanged between peers to establish a call
///
/// `peer_id` is the remote participant the payload targets. The `sdp` and
/// `candidate` fields are opaque serialized strings passed through to the
/// remote peer unmodified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// SDP offer from the caller
    Offer {
        /// Remote peer identifier
        peer_id: String,
        /// Serialized SDP offer
        sdp: String,
    },

    /// SDP answer from the callee
    Answer {
        /// Remote peer identifier
        peer_id: String,
        /// Serialized SDP answer
        sdp: String,
    },

    /// A locally discovered ICE candidate, streamed as it becomes available
    IceCandidate {
        /// Remote peer identifier
        peer_id: String,
        /// Serialized ICE candidate
        candidate: String,
    },
}

impl SignalingMessage {
    /// Get the peer this message targets
    pub fn peer_id(&self) -> &str {
        match self {
            SignalingMessage::Offer { peer_id, .. }
            | SignalingMessage::Answer { peer_id, .. }
            | SignalingMessage::IceCandidate { peer_id, .. } => peer_id,
        }
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling message: {}",
                e
            ))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize signaling message: {}",
                e
            ))
        })
    }
}

/// Out-of-band delivery of signaling payloads to a remote peer
///
/// Implementations carry the message to the peer named by
/// [`SignalingMessage::peer_id`]. Inbound messages are fed back into the
/// registry by the application (`join`, `receive_answer`,
/// `receive_ice_candidate`).
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Deliver a signaling message to the remote peer it targets
    async fn send(&self, message: SignalingMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_serialization() {
        let msg = SignalingMessage::Offer {
            peer_id: "peer-bob".to_string(),
            sdp: "v=0\r\no=- ...".to_string(),
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"offer\""));

        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_answer_serialization() {
        let msg = SignalingMessage::Answer {
            peer_id: "peer-alice".to_string(),
            sdp: "v=0\r\no=- ...".to_string(),
        };

        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
    }

    #[test]
    fn test_ice_candidate_serialization() {
        let msg = SignalingMessage::IceCandidate {
            peer_id: "peer-bob".to_string(),
            candidate: "{\"candidate\":\"candidate:1 1 udp ...\"}".to_string(),
        };

        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(msg, parsed);
        assert_eq!(parsed.peer_id(), "peer-bob");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(SignalingMessage::from_json("not json").is_err());
        assert!(SignalingMessage::from_json("{\"type\":\"unknown\"}").is_err());
    }
}
