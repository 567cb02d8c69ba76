//! Error types for the voice chat core

/// Result type alias using the voice chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing voice chat sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Microphone capture unavailable or denied
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// SDP generation or application rejected by the transport
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Malformed or out-of-context ICE candidate
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Signaling relay delivery error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is scoped to a single peer session
    ///
    /// Peer-scoped errors leave all other sessions unaffected.
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::CaptureError(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::PeerConnectionError(_)
        )
    }
}
