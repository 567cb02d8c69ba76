//! End-to-end call establishment between two in-process registries.
//!
//! Signaling is pumped over tokio channels and ICE runs over the loopback
//! interface, so the full offer/answer/candidate exchange and DTLS
//! handshake complete without any external network.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use voicechat_webrtc::{
    ConnectionState, Error, NullAudioSink, OpusTrackCapture, Result, SessionEvent,
    SessionRegistry, SignalingMessage, SignalingRelay, VoiceChatConfig,
};

/// Relay that hands outbound messages to a channel for delivery
struct ChannelRelay(UnboundedSender<SignalingMessage>);

#[async_trait]
impl SignalingRelay for ChannelRelay {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        self.0
            .send(message)
            .map_err(|e| Error::SignalingError(e.to_string()))
    }
}

fn make_registry(
    config: &VoiceChatConfig,
) -> (
    Arc<SessionRegistry>,
    UnboundedReceiver<SessionEvent>,
    UnboundedReceiver<SignalingMessage>,
) {
    let (tx, outbound) = unbounded_channel();
    let (registry, events) = SessionRegistry::new(
        config.clone(),
        Arc::new(ChannelRelay(tx)),
        Arc::new(OpusTrackCapture),
        Arc::new(NullAudioSink),
    )
    .expect("registry construction");
    (Arc::new(registry), events, outbound)
}

/// Deliver one side's outbound signaling into the other side's registry
fn pump(
    mut outbound: UnboundedReceiver<SignalingMessage>,
    target: Arc<SessionRegistry>,
    sender_id: &'static str,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let result = match message {
                SignalingMessage::Offer { sdp, .. } => target.join(sender_id, sdp).await,
                SignalingMessage::Answer { sdp, .. } => {
                    target.receive_answer(sender_id, sdp).await
                }
                SignalingMessage::IceCandidate { candidate, .. } => {
                    target.receive_ice_candidate(sender_id, candidate).await
                }
            };
            if let Err(e) = result {
                eprintln!("signaling delivery from {} failed: {}", sender_id, e);
            }
        }
    });
}

async fn next_connected(events: &mut UnboundedReceiver<SessionEvent>) -> String {
    loop {
        match events.recv().await.expect("event channel closed") {
            SessionEvent::Connected { peer_id } => return peer_id,
            SessionEvent::Error { peer_id, message } => {
                panic!("session error for {}: {}", peer_id, message)
            }
            SessionEvent::Disconnected { .. } => {}
        }
    }
}

#[tokio::test]
async fn voice_call_connects_over_loopback() {
    let config = VoiceChatConfig {
        include_loopback_candidates: true,
        ..Default::default()
    };

    let (alice, mut alice_events, alice_outbound) = make_registry(&config);
    let (bob, mut bob_events, bob_outbound) = make_registry(&config);

    // Alice's messages are delivered to Bob attributed to "alice", and
    // vice versa.
    pump(alice_outbound, Arc::clone(&bob), "alice");
    pump(bob_outbound, Arc::clone(&alice), "bob");

    alice.start("bob").await.expect("start call");

    let connected = tokio::time::timeout(Duration::from_secs(30), async {
        let a = next_connected(&mut alice_events).await;
        let b = next_connected(&mut bob_events).await;
        (a, b)
    })
    .await
    .expect("timed out waiting for both sides to connect");

    assert_eq!(connected.0, "bob");
    assert_eq!(connected.1, "alice");

    let alice_sessions = alice.list_sessions().await;
    assert_eq!(alice_sessions.len(), 1);
    assert_eq!(alice_sessions[0].state, ConnectionState::Connected);

    let bob_sessions = bob.list_sessions().await;
    assert_eq!(bob_sessions.len(), 1);
    assert_eq!(bob_sessions[0].state, ConnectionState::Connected);

    // Muting toggles the local track without renegotiation; the sessions
    // stay connected and no notifications are produced.
    alice.set_muted(true).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alice_events.try_recv().is_err());
    assert_eq!(alice.list_sessions().await[0].state, ConnectionState::Connected);
    alice.set_muted(false).await;

    // Hanging up on both sides removes the sessions without emitting
    // further notifications locally.
    alice.leave("bob").await;
    bob.leave("alice").await;
    assert_eq!(alice.session_count().await, 0);
    assert_eq!(bob.session_count().await, 0);
    assert!(alice_events.try_recv().is_err());
}

#[tokio::test]
async fn restart_replaces_call_on_both_sides() {
    let config = VoiceChatConfig {
        include_loopback_candidates: true,
        ..Default::default()
    };

    let (alice, mut alice_events, alice_outbound) = make_registry(&config);
    let (bob, mut bob_events, bob_outbound) = make_registry(&config);

    pump(alice_outbound, Arc::clone(&bob), "alice");
    pump(bob_outbound, Arc::clone(&alice), "bob");

    alice.start("bob").await.expect("first start");
    tokio::time::timeout(Duration::from_secs(30), async {
        next_connected(&mut alice_events).await;
        next_connected(&mut bob_events).await;
    })
    .await
    .expect("timed out waiting for first call");

    // Restart mid-call: the fresh offer supersedes Alice's session
    // locally and replaces Bob's session when it arrives, and the new
    // handshake converges to a single connected session per side.
    alice.start("bob").await.expect("second start");

    let connected = tokio::time::timeout(Duration::from_secs(30), async {
        let a = next_connected(&mut alice_events).await;
        let b = next_connected(&mut bob_events).await;
        (a, b)
    })
    .await
    .expect("timed out waiting for restarted call");

    assert_eq!(connected, ("bob".to_string(), "alice".to_string()));
    assert_eq!(alice.session_count().await, 1);
    assert_eq!(bob.session_count().await, 1);
}
