//! The session registry: maps each remote peer to at most one active
//! session and orchestrates the caller/callee handshake.
//!
//! Commands for the same peer supersede each other: every `start`, `join`,
//! and `leave` bumps that peer's generation marker, and every asynchronous
//! continuation re-checks that its generation is still current before
//! mutating shared state. A superseded attempt releases its own resources
//! (capture handle, connection) and exits silently.

use crate::config::VoiceChatConfig;
use crate::events::SessionEvent;
use crate::media::{AudioSink, LocalAudioTrack, MediaCapture};
use crate::peer::{ConnectionState, PeerConnection};
use crate::signaling::{SignalingMessage, SignalingRelay};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Which side of the handshake a session was created on
///
/// Immutable for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// This side initiated the call (sent the offer)
    Caller,
    /// This side joined an incoming call (sent the answer)
    Callee,
}

/// Snapshot of an active session for introspection
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote peer identifier
    pub peer_id: String,

    /// Handshake role
    pub role: CallRole,

    /// Current connection state
    pub state: ConnectionState,
}

/// An active voice chat session with one remote peer
struct Session {
    /// Handshake role, set at creation
    role: CallRole,

    /// Generation marker; stale continuations carry an older value
    generation: u64,

    /// Exclusively owned connection handle
    connection: Arc<PeerConnection>,

    /// Exclusively owned local capture handle, absent if capture failed
    local_track: Option<Arc<LocalAudioTrack>>,
}

/// Which handshake a new session performs
enum Handshake {
    /// Caller side: generate and emit an offer
    Outbound,
    /// Callee side: apply the remote offer, generate and emit an answer
    Inbound {
        /// The caller's SDP offer
        offer_sdp: String,
    },
}

/// Session registry: the per-peer session map and its command handlers
///
/// Owns the session collection exclusively; no other component reads or
/// writes it. Constructed once per application lifetime; call
/// [`SessionRegistry::shutdown`] on application exit.
pub struct SessionRegistry {
    /// Transport configuration
    config: VoiceChatConfig,

    /// Map of peer_id to active session (at most one per peer)
    sessions: Arc<RwLock<HashMap<String, Session>>>,

    /// Current generation marker per peer
    generations: Arc<Mutex<HashMap<String, u64>>>,

    /// Outbound signaling delivery
    relay: Arc<dyn SignalingRelay>,

    /// Local audio capture acquisition
    capture: Arc<dyn MediaCapture>,

    /// Remote audio rendering
    sink: Arc<dyn AudioSink>,

    /// Lifecycle notifications to the application
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionRegistry {
    /// Create a new session registry
    ///
    /// Returns the registry together with the receiver for
    /// [`SessionEvent`] notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: VoiceChatConfig,
        relay: Arc<dyn SignalingRelay>,
        capture: Arc<dyn MediaCapture>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;

        let (events, receiver) = mpsc::unbounded_channel();

        Ok((
            Self {
                config,
                sessions: Arc::new(RwLock::new(HashMap::new())),
                generations: Arc::new(Mutex::new(HashMap::new())),
                relay,
                capture,
                sink,
                events,
            },
            receiver,
        ))
    }

    /// Begin a call to `peer_id` as the caller
    ///
    /// Any existing session or in-flight attempt for the peer is
    /// superseded and torn down first. On success an `Offer` is emitted
    /// via the signaling relay; on failure no session is registered, an
    /// `Error` notification is emitted, and the prior session stays torn
    /// down.
    pub async fn start(&self, peer_id: &str) -> Result<()> {
        info!("Starting voice chat with peer {} as caller", peer_id);

        let generation = self.bump_generation(peer_id).await;
        self.teardown(peer_id).await;

        match self.establish(peer_id, generation, Handshake::Outbound).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.emit_error(peer_id, &e);
                Err(e)
            }
        }
    }

    /// Join an incoming call from `peer_id` as the callee
    ///
    /// Same supersession and failure semantics as [`SessionRegistry::start`];
    /// on success an `Answer` is emitted via the signaling relay.
    pub async fn join(&self, peer_id: &str, offer_sdp: String) -> Result<()> {
        info!("Joining voice chat with peer {} as callee", peer_id);

        let generation = self.bump_generation(peer_id).await;
        self.teardown(peer_id).await;

        match self
            .establish(peer_id, generation, Handshake::Inbound { offer_sdp })
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.emit_error(peer_id, &e);
                Err(e)
            }
        }
    }

    /// Apply a remote answer to an existing caller session
    ///
    /// Silently dropped unless a `Caller` session in `Negotiating` exists
    /// for the peer; the session may have been torn down by a more recent
    /// command, which is not an error. An apply failure emits `Error` and
    /// leaves the session untouched; the connection-state observer is the
    /// sole source of truth for failure transitions.
    pub async fn receive_answer(&self, peer_id: &str, answer_sdp: String) -> Result<()> {
        let connection = {
            let sessions = self.sessions.read().await;
            match sessions.get(peer_id) {
                Some(session) if session.role == CallRole::Caller => {
                    Arc::clone(&session.connection)
                }
                Some(_) => {
                    debug!("Dropping answer for {}: session is not a caller", peer_id);
                    return Ok(());
                }
                None => {
                    debug!("Dropping answer for {}: no session", peer_id);
                    return Ok(());
                }
            }
        };

        if connection.state().await != ConnectionState::Negotiating {
            debug!("Dropping answer for {}: connection not negotiating", peer_id);
            return Ok(());
        }

        if let Err(e) = connection.apply_answer(answer_sdp).await {
            warn!("Failed to apply answer from {}: {}", peer_id, e);
            self.emit_error(peer_id, &e);
            return Err(e);
        }

        Ok(())
    }

    /// Feed a remote ICE candidate to an existing session
    ///
    /// No-op if no session exists for the peer. A malformed or stale
    /// candidate is reported via `Error` but does not tear down the
    /// session.
    pub async fn receive_ice_candidate(&self, peer_id: &str, candidate: String) -> Result<()> {
        let connection = {
            let sessions = self.sessions.read().await;
            match sessions.get(peer_id) {
                Some(session) => Arc::clone(&session.connection),
                None => {
                    debug!("Dropping ICE candidate for {}: no session", peer_id);
                    return Ok(());
                }
            }
        };

        if let Err(e) = connection.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate from {}: {}", peer_id, e);
            self.emit_error(peer_id, &e);
            return Err(e);
        }

        Ok(())
    }

    /// Leave the session with `peer_id`
    ///
    /// Closes the connection, stops local capture, detaches the audio
    /// sink, and removes the session. Idempotent; produces no
    /// notifications, and also invalidates any in-flight attempt for the
    /// peer.
    pub async fn leave(&self, peer_id: &str) {
        info!("Leaving voice chat with peer {}", peer_id);

        self.bump_generation(peer_id).await;
        self.teardown(peer_id).await;
    }

    /// Mute or unmute the local microphone across all active sessions
    ///
    /// Toggles the enabled flag on each session's local audio track
    /// without renegotiation; sessions with no local stream are
    /// unaffected.
    pub async fn set_muted(&self, muted: bool) {
        debug!("Setting muted={} on all sessions", muted);

        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if let Some(track) = &session.local_track {
                track.set_enabled(!muted);
            }
        }
    }

    /// Check if a session exists for the peer
    pub async fn has_session(&self, peer_id: &str) -> bool {
        self.sessions.read().await.contains_key(peer_id)
    }

    /// Get the number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// List all sessions with their role and connection state
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;

        let mut infos = Vec::with_capacity(sessions.len());
        for (peer_id, session) in sessions.iter() {
            infos.push(SessionInfo {
                peer_id: peer_id.clone(),
                role: session.role,
                state: session.connection.state().await,
            });
        }

        infos
    }

    /// Tear down every session (application shutdown)
    pub async fn shutdown(&self) {
        info!("Shutting down session registry");

        let peers: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for peer_id in peers {
            self.leave(&peer_id).await;
        }
    }

    /// Acquire capture, build the connection, and run the handshake
    ///
    /// Every step after a suspension point re-checks the generation; a
    /// superseded attempt cleans up its own resources and returns Ok.
    async fn establish(
        &self,
        peer_id: &str,
        generation: u64,
        handshake: Handshake,
    ) -> Result<()> {
        let role = match &handshake {
            Handshake::Outbound => CallRole::Caller,
            Handshake::Inbound { .. } => CallRole::Callee,
        };

        let local_track = self.capture.acquire_audio().await?;

        if !self.generation_current(peer_id, generation).await {
            debug!("Attempt for {} superseded after capture", peer_id);
            local_track.stop();
            return Ok(());
        }

        let connection = match PeerConnection::new(peer_id.to_string(), &self.config).await {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                local_track.stop();
                return Err(e);
            }
        };

        self.install_observers(&connection, peer_id, generation).await;

        match self
            .negotiate(peer_id, generation, role, handshake, &connection, &local_track)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if !self.generation_current(peer_id, generation).await {
                    // Superseded mid-attempt: the failure is fallout of the
                    // replacing command closing this connection under us.
                    // Release only this attempt's resources; the successor
                    // owns the map entry and the sink now.
                    debug!(
                        "Attempt for {} superseded during negotiation ({})",
                        peer_id, e
                    );
                    local_track.stop();
                    if let Err(close_err) = connection.close().await {
                        warn!(
                            "Error closing superseded connection for {}: {}",
                            peer_id, close_err
                        );
                    }
                    return Ok(());
                }

                self.discard_attempt(peer_id, generation, &connection, &local_track)
                    .await;
                Err(e)
            }
        }
    }

    /// Register the session and perform the offer/answer exchange
    async fn negotiate(
        &self,
        peer_id: &str,
        generation: u64,
        role: CallRole,
        handshake: Handshake,
        connection: &Arc<PeerConnection>,
        local_track: &Arc<LocalAudioTrack>,
    ) -> Result<()> {
        connection.add_local_audio(local_track).await?;

        let session = Session {
            role,
            generation,
            connection: Arc::clone(connection),
            local_track: Some(Arc::clone(local_track)),
        };

        if !self.insert_if_current(peer_id, session).await {
            debug!("Attempt for {} superseded before registration", peer_id);
            local_track.stop();
            if let Err(e) = connection.close().await {
                warn!("Error closing superseded connection for {}: {}", peer_id, e);
            }
            return Ok(());
        }

        let message = match handshake {
            Handshake::Outbound => {
                let sdp = connection.create_offer().await?;
                SignalingMessage::Offer {
                    peer_id: peer_id.to_string(),
                    sdp,
                }
            }
            Handshake::Inbound { offer_sdp } => {
                let sdp = connection.create_answer(offer_sdp).await?;
                SignalingMessage::Answer {
                    peer_id: peer_id.to_string(),
                    sdp,
                }
            }
        };

        if !self.generation_current(peer_id, generation).await {
            // The superseding command already tore down the registered
            // session, closing this connection with it.
            debug!("Attempt for {} superseded after negotiation", peer_id);
            return Ok(());
        }

        self.relay.send(message).await?;

        Ok(())
    }

    /// Wire the connection observers, all guarded by the generation marker
    async fn install_observers(
        &self,
        connection: &Arc<PeerConnection>,
        peer_id: &str,
        generation: u64,
    ) {
        // Locally discovered candidates stream straight to the relay.
        let relay = Arc::clone(&self.relay);
        let generations = Arc::clone(&self.generations);
        let events = self.events.clone();
        let peer = peer_id.to_string();
        connection
            .on_ice_candidate(move |candidate| {
                let relay = Arc::clone(&relay);
                let generations = Arc::clone(&generations);
                let events = events.clone();
                let peer = peer.clone();

                async move {
                    if !generation_is_current(&generations, &peer, generation).await {
                        return;
                    }

                    let message = SignalingMessage::IceCandidate {
                        peer_id: peer.clone(),
                        candidate,
                    };
                    if let Err(e) = relay.send(message).await {
                        warn!("Failed to relay ICE candidate for {}: {}", peer, e);
                        let _ = events.send(SessionEvent::Error {
                            peer_id: peer,
                            message: e.to_string(),
                        });
                    }
                }
            })
            .await;

        // Connected/Disconnected notifications come only from here.
        let generations = Arc::clone(&self.generations);
        let events = self.events.clone();
        let peer = peer_id.to_string();
        connection
            .on_state_change(move |state| {
                let generations = Arc::clone(&generations);
                let events = events.clone();
                let peer = peer.clone();

                async move {
                    if !generation_is_current(&generations, &peer, generation).await {
                        return;
                    }

                    let event = match state {
                        ConnectionState::Connected => SessionEvent::Connected { peer_id: peer },
                        ConnectionState::Disconnected => {
                            SessionEvent::Disconnected { peer_id: peer }
                        }
                        _ => return,
                    };
                    let _ = events.send(event);
                }
            })
            .await;

        // Remote track arrival: replace any previously attached sink
        // output, then begin rendering.
        let sink = Arc::clone(&self.sink);
        let generations = Arc::clone(&self.generations);
        let peer = peer_id.to_string();
        connection
            .on_track(move |track| {
                let sink = Arc::clone(&sink);
                let generations = Arc::clone(&generations);
                let peer = peer.clone();

                async move {
                    if !generation_is_current(&generations, &peer, generation).await {
                        return;
                    }

                    debug!("Remote audio track arrived from peer {}", peer);
                    sink.detach(&peer).await;
                    sink.attach(&peer, track).await;
                }
            })
            .await;
    }

    /// Remove and release the session for a peer, if any
    ///
    /// The sink is detached unconditionally so a track attached by a
    /// just-superseded attempt is never left dangling.
    async fn teardown(&self, peer_id: &str) {
        let session = self.sessions.write().await.remove(peer_id);

        if let Some(session) = session {
            debug!("Tearing down session for peer {}", peer_id);

            if let Err(e) = session.connection.close().await {
                warn!("Error closing connection for {}: {}", peer_id, e);
            }
            if let Some(track) = &session.local_track {
                track.stop();
            }
        }

        self.sink.detach(peer_id).await;
    }

    /// Release a failed establishment attempt, leaving no partial session
    async fn discard_attempt(
        &self,
        peer_id: &str,
        generation: u64,
        connection: &Arc<PeerConnection>,
        local_track: &Arc<LocalAudioTrack>,
    ) {
        {
            let mut sessions = self.sessions.write().await;
            if sessions.get(peer_id).map(|s| s.generation) == Some(generation) {
                sessions.remove(peer_id);
            }
        }

        local_track.stop();
        if let Err(e) = connection.close().await {
            warn!("Error closing discarded connection for {}: {}", peer_id, e);
        }
        self.sink.detach(peer_id).await;
    }

    /// Advance the peer's generation marker, invalidating older attempts
    async fn bump_generation(&self, peer_id: &str) -> u64 {
        let mut generations = self.generations.lock().await;
        let counter = generations.entry(peer_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Check that a generation marker is still current for the peer
    async fn generation_current(&self, peer_id: &str, generation: u64) -> bool {
        generation_is_current(&self.generations, peer_id, generation).await
    }

    /// Register the session unless the attempt was superseded meanwhile
    ///
    /// The generation lock is held across the insertion so a stale
    /// attempt can never overwrite its successor's session.
    async fn insert_if_current(&self, peer_id: &str, session: Session) -> bool {
        let generations = self.generations.lock().await;
        if generations.get(peer_id).copied() != Some(session.generation) {
            return false;
        }

        self.sessions
            .write()
            .await
            .insert(peer_id.to_string(), session);
        true
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event receiver dropped");
        }
    }

    fn emit_error(&self, peer_id: &str, error: &Error) {
        self.emit(SessionEvent::Error {
            peer_id: peer_id.to_string(),
            message: error.to_string(),
        });
    }
}

/// Shared generation check for connection callbacks
async fn generation_is_current(
    generations: &Mutex<HashMap<String, u64>>,
    peer_id: &str,
    generation: u64,
) -> bool {
    generations.lock().await.get(peer_id).copied() == Some(generation)
}
