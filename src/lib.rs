//! # voicechat-webrtc
//!
//! Peer-to-peer voice chat session management over WebRTC.
//!
//! This crate owns the lifecycle of one-to-one voice calls: it performs
//! the offer/answer handshake, relays ICE candidates incrementally, tracks
//! per-peer connection state, and guarantees that each remote peer has at
//! most one active session. Signaling transport, audio capture, and audio
//! playback are supplied by the application through the
//! [`SignalingRelay`], [`MediaCapture`], and [`AudioSink`] traits.
//!
//! ## Architecture
//!
//! ```text
//! +-------------+   commands    +-----------------+   SDP/ICE    +-----------------+
//! | Application | ------------> | SessionRegistry | -----------> | SignalingRelay  |
//! |             | <------------ |                 |              | (app-provided)  |
//! +-------------+ SessionEvent  +--------+--------+              +-----------------+
//!                                        |
//!                                        | one per peer
//!                                        v
//!                               +-----------------+
//!                               | PeerConnection  | --- RTP ---> remote peer
//!                               +-----------------+
//! ```
//!
//! Every `start`, `join`, and `leave` for a peer supersedes whatever was
//! in flight for that peer; superseded attempts release their resources
//! silently. Lifecycle notifications reach the application over an
//! unbounded event channel.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicechat_webrtc::{
//!     NullAudioSink, OpusTrackCapture, SessionRegistry, SignalingMessage, SignalingRelay,
//!     VoiceChatConfig,
//! };
//!
//! struct ChannelRelay(tokio::sync::mpsc::UnboundedSender<SignalingMessage>);
//!
//! #[async_trait::async_trait]
//! impl SignalingRelay for ChannelRelay {
//!     async fn send(&self, message: SignalingMessage) -> voicechat_webrtc::Result<()> {
//!         self.0
//!             .send(message)
//!             .map_err(|e| voicechat_webrtc::Error::SignalingError(e.to_string()))
//!     }
//! }
//!
//! # async fn run() -> voicechat_webrtc::Result<()> {
//! let (tx, mut _signaling) = tokio::sync::mpsc::unbounded_channel();
//! let (registry, mut _events) = SessionRegistry::new(
//!     VoiceChatConfig::default(),
//!     Arc::new(ChannelRelay(tx)),
//!     Arc::new(OpusTrackCapture),
//!     Arc::new(NullAudioSink),
//! )?;
//!
//! registry.start("peer-alice").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{TurnServerConfig, VoiceChatConfig};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use media::{AudioSink, LocalAudioTrack, MediaCapture, NullAudioSink, OpusTrackCapture};
pub use peer::{ConnectionState, PeerConnection};
pub use session::{CallRole, SessionInfo, SessionRegistry};
pub use signaling::{SignalingMessage, SignalingRelay};

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
