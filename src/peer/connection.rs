//! WebRTC peer connection wrapper
//!
//! One [`PeerConnection`] instance per call attempt; a closed instance is
//! never reused, a new call to the same peer requires a fresh one.

use crate::config::VoiceChatConfig;
use crate::media::LocalAudioTrack;
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection as WebRTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Connection lifecycle state
///
/// `Closed` is terminal: it is entered only by an explicit [`PeerConnection::close`]
/// and never left. Transport-level "disconnected", "failed", and "closed"
/// all surface as `Disconnected`; the notification layer does not
/// distinguish a graceful close from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, negotiation not yet started
    Idle,
    /// Offer/answer handshake in progress
    Negotiating,
    /// Connection established
    Connected,
    /// Connection lost, failed, or closed by the remote side
    Disconnected,
    /// Explicitly closed; terminal
    Closed,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type CandidateHandler = Box<dyn Fn(String) -> BoxFuture + Send + Sync>;
type StateHandler = Box<dyn Fn(ConnectionState) -> BoxFuture + Send + Sync>;
type TrackHandler = Box<dyn Fn(Arc<TrackRemote>) -> BoxFuture + Send + Sync>;

/// WebRTC peer connection wrapper
///
/// Wraps a `webrtc::RTCPeerConnection` and exposes the primitives the
/// session registry drives: offer/answer generation, remote description
/// application, incremental candidate feeding, and the asynchronous
/// observers for discovered candidates, state transitions, and remote
/// tracks.
pub struct PeerConnection {
    /// Unique identifier for the remote peer
    peer_id: String,

    /// Unique identifier for this connection instance
    connection_id: String,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Actual WebRTC peer connection
    peer_connection: Arc<WebRTCPeerConnection>,

    /// Remote candidates received before the remote description was set
    ///
    /// webrtc-rs rejects candidates added before the remote description;
    /// they are held here and flushed once it is applied, so incremental
    /// delivery in any order is tolerated.
    pending_candidates: Arc<Mutex<Vec<RTCIceCandidateInit>>>,

    /// Audio RTP sender (retained to prevent track cleanup)
    audio_sender: Arc<RwLock<Option<Arc<RTCRtpSender>>>>,

    /// Locally discovered candidate observer
    candidate_handler: Arc<RwLock<Option<CandidateHandler>>>,

    /// Coarse state transition observer (Connected / Disconnected only)
    state_handler: Arc<RwLock<Option<StateHandler>>>,

    /// Remote track observer
    track_handler: Arc<RwLock<Option<TrackHandler>>>,
}

impl PeerConnection {
    /// Create a new peer connection
    ///
    /// # Arguments
    ///
    /// * `peer_id` - Unique identifier for the remote peer
    /// * `config` - STUN/TURN server configuration
    pub async fn new(peer_id: String, config: &VoiceChatConfig) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Creating peer connection: peer_id={}, connection_id={}",
            peer_id, connection_id
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let mut setting_engine = SettingEngine::default();
        if config.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let state = Arc::new(RwLock::new(ConnectionState::Idle));
        let candidate_handler: Arc<RwLock<Option<CandidateHandler>>> =
            Arc::new(RwLock::new(None));
        let state_handler: Arc<RwLock<Option<StateHandler>>> = Arc::new(RwLock::new(None));
        let track_handler: Arc<RwLock<Option<TrackHandler>>> = Arc::new(RwLock::new(None));

        // Stream each locally discovered candidate to the observer as it
        // becomes available; a None candidate marks end of gathering.
        let handler = Arc::clone(&candidate_handler);
        let candidate_peer = peer_id.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let handler = Arc::clone(&handler);
            let peer_id = candidate_peer.clone();

            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE candidate gathering completed for peer {}", peer_id);
                    return;
                };

                let json = match candidate.to_json() {
                    Ok(init) => match serde_json::to_string(&init) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize ICE candidate for {}: {}", peer_id, e);
                            return;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to convert ICE candidate for {}: {}", peer_id, e);
                        return;
                    }
                };

                if let Some(handler) = handler.read().await.as_ref() {
                    handler(json).await;
                }
            })
        }));

        // Map transport states onto the coarse lifecycle. A connection we
        // closed ourselves stays Closed and emits nothing further.
        let state_clone = Arc::clone(&state);
        let handler = Arc::clone(&state_handler);
        let state_peer = peer_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state = Arc::clone(&state_clone);
                let handler = Arc::clone(&handler);
                let peer_id = state_peer.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => ConnectionState::Disconnected,
                        _ => return,
                    };

                    {
                        let mut state_guard = state.write().await;
                        if *state_guard == ConnectionState::Closed || *state_guard == new_state {
                            return;
                        }
                        debug!(
                            "Peer {} state transition: {:?} -> {:?}",
                            peer_id, *state_guard, new_state
                        );
                        *state_guard = new_state;
                    }

                    if let Some(handler) = handler.read().await.as_ref() {
                        handler(new_state).await;
                    }
                })
            },
        ));

        // Remote track arrival; may fire zero or more times per session.
        let handler = Arc::clone(&track_handler);
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let handler = Arc::clone(&handler);

                Box::pin(async move {
                    if let Some(handler) = handler.read().await.as_ref() {
                        handler(track).await;
                    }
                })
            },
        ));

        Ok(Self {
            peer_id,
            connection_id,
            state,
            peer_connection,
            pending_candidates: Arc::new(Mutex::new(Vec::new())),
            audio_sender: Arc::new(RwLock::new(None)),
            candidate_handler,
            state_handler,
            track_handler,
        })
    }

    /// Get the peer ID
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Register the observer for locally discovered ICE candidates
    ///
    /// Each candidate is forwarded individually as it is discovered, as a
    /// serialized JSON payload ready for the signaling relay.
    pub async fn on_ice_candidate<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.candidate_handler.write().await =
            Some(Box::new(move |candidate| Box::pin(handler(candidate))));
    }

    /// Register the observer for coarse connection-state transitions
    ///
    /// Only `Connected` and `Disconnected` are reported.
    pub async fn on_state_change<F, Fut>(&self, handler: F)
    where
        F: Fn(ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.state_handler.write().await =
            Some(Box::new(move |state| Box::pin(handler(state))));
    }

    /// Register the observer for incoming remote audio tracks
    pub async fn on_track<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<TrackRemote>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.track_handler.write().await =
            Some(Box::new(move |track| Box::pin(handler(track))));
    }

    /// Attach the local capture track, retaining the RTP sender
    pub async fn add_local_audio(&self, track: &LocalAudioTrack) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track.rtp_track())
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to add audio track: {}", e)))?;

        *self.audio_sender.write().await = Some(sender);

        debug!("Local audio track attached for peer {}", self.peer_id);

        Ok(())
    }

    /// Create an SDP offer
    ///
    /// Generates a local SDP offer for initiating a call. Returns the SDP
    /// string to be sent to the remote peer via signaling.
    pub async fn create_offer(&self) -> Result<String> {
        self.set_state(ConnectionState::Negotiating).await;

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for peer {}", self.peer_id);

        Ok(local_desc.sdp)
    }

    /// Create an SDP answer in response to an offer
    ///
    /// # Arguments
    ///
    /// * `offer_sdp` - The SDP offer received from the remote peer
    pub async fn create_answer(&self, offer_sdp: String) -> Result<String> {
        self.set_state(ConnectionState::Negotiating).await;

        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        self.flush_pending_candidates().await;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting answer".to_string())
            })?;

        debug!("Created SDP answer for peer {}", self.peer_id);

        Ok(local_desc.sdp)
    }

    /// Apply a remote SDP answer
    ///
    /// # Arguments
    ///
    /// * `answer_sdp` - The SDP answer received from the remote peer
    pub async fn apply_answer(&self, answer_sdp: String) -> Result<()> {
        debug!("Applying remote answer for peer {}", self.peer_id);

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        self.flush_pending_candidates().await;

        Ok(())
    }

    /// Add a remote ICE candidate
    ///
    /// Candidates arriving before the remote description is applied are
    /// buffered and flushed once negotiation allows them; they are never
    /// lost and a malformed candidate never tears down the connection.
    ///
    /// # Arguments
    ///
    /// * `candidate` - ICE candidate JSON string from the remote peer
    pub async fn add_ice_candidate(&self, candidate: String) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(&candidate).map_err(|e| {
            Error::IceCandidateError(format!("Failed to parse ICE candidate: {}", e))
        })?;

        if self.peer_connection.remote_description().await.is_none() {
            debug!(
                "Buffering ICE candidate for peer {} (no remote description yet)",
                self.peer_id
            );
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Apply candidates buffered before the remote description was set
    async fn flush_pending_candidates(&self) {
        let pending: Vec<RTCIceCandidateInit> =
            self.pending_candidates.lock().await.drain(..).collect();

        if pending.is_empty() {
            return;
        }

        debug!(
            "Flushing {} buffered ICE candidates for peer {}",
            pending.len(),
            self.peer_id
        );

        for init in pending {
            if let Err(e) = self.peer_connection.add_ice_candidate(init).await {
                warn!(
                    "Failed to apply buffered ICE candidate for peer {}: {}",
                    self.peer_id, e
                );
            }
        }
    }

    /// Number of candidates currently buffered awaiting a remote description
    #[cfg(test)]
    pub(crate) async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    /// Close the connection
    ///
    /// Terminal; a new call to the same peer requires a new instance.
    pub async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);

        *self.state.write().await = ConnectionState::Closed;

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })?;

        Ok(())
    }

    /// Set the connection state, preserving terminal Closed
    async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Closed {
            return;
        }
        if *state != new_state {
            debug!(
                "Peer {} state transition: {:?} -> {:?}",
                self.peer_id, *state, new_state
            );
            *state = new_state;
        }
    }
}
