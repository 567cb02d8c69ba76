//! Media capture and rendering seams
//!
//! Microphone capture and audio playback are external capabilities: the
//! application supplies a [`MediaCapture`] that yields a local track and an
//! [`AudioSink`] that renders remote tracks. The core only owns the handles
//! and their lifecycle (mute, stop, attach/detach).

use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Opus sample rate used for local capture tracks
const OPUS_CLOCK_RATE: u32 = 48_000;

/// Opus channel count used for local capture tracks
const OPUS_CHANNELS: u16 = 2;

/// Handle to the local microphone capture feeding a session
///
/// Wraps the RTP track the capture pipeline writes encoded Opus samples
/// into. Muting clears the `enabled` flag without renegotiation; samples
/// written while muted or stopped are dropped silently.
pub struct LocalAudioTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalAudioTrack {
    /// Create a new local audio track wrapper
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// Get the underlying RTP track for attachment to a peer connection
    pub fn rtp_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Enable or disable the track (mute toggle, no renegotiation)
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Check whether the track is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stop the track permanently (session teardown)
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Check whether the track has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Write an encoded Opus sample to the track
    ///
    /// Samples are dropped silently while the track is muted or stopped.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_stopped() || !self.is_enabled() {
            return Ok(());
        }

        self.track
            .write_sample(sample)
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to write audio sample: {}", e)))
    }
}

/// Acquisition of the local audio capture handle
///
/// Failure (microphone unavailable or permission denied) is reported as
/// [`Error::CaptureError`] and aborts session establishment.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire the local microphone as an Opus audio track
    async fn acquire_audio(&self) -> Result<Arc<LocalAudioTrack>>;
}

/// Default capture that allocates an Opus track per session
///
/// The returned track carries no samples by itself; the application's
/// capture pipeline writes into it via [`LocalAudioTrack::write_sample`].
#[derive(Debug, Default)]
pub struct OpusTrackCapture;

#[async_trait]
impl MediaCapture for OpusTrackCapture {
    async fn acquire_audio(&self) -> Result<Arc<LocalAudioTrack>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("audio-{}", uuid::Uuid::new_v4()),
            "voice-chat".to_string(),
        ));

        Ok(Arc::new(LocalAudioTrack::new(track)))
    }
}

/// Rendering of incoming remote audio, keyed by peer
///
/// The registry calls `detach` before every `attach` (duplicate-track
/// defense) and exactly once on session teardown; implementations must
/// tolerate `detach` for a peer that has nothing attached.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Begin rendering a remote audio track for the given peer
    async fn attach(&self, peer_id: &str, track: Arc<TrackRemote>);

    /// Stop rendering and release the output for the given peer
    async fn detach(&self, peer_id: &str);
}

/// No-op sink for headless operation and tests
#[derive(Debug, Default)]
pub struct NullAudioSink;

#[async_trait]
impl AudioSink for NullAudioSink {
    async fn attach(&self, peer_id: &str, _track: Arc<TrackRemote>) {
        debug!("NullAudioSink: attach for peer {}", peer_id);
    }

    async fn detach(&self, peer_id: &str) {
        debug!("NullAudioSink: detach for peer {}", peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn make_track() -> Arc<LocalAudioTrack> {
        OpusTrackCapture.acquire_audio().await.unwrap()
    }

    #[tokio::test]
    async fn test_track_starts_enabled() {
        let track = make_track().await;
        assert!(track.is_enabled());
        assert!(!track.is_stopped());
    }

    #[tokio::test]
    async fn test_mute_toggle() {
        let track = make_track().await;

        track.set_enabled(false);
        assert!(!track.is_enabled());

        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[tokio::test]
    async fn test_stop_is_permanent() {
        let track = make_track().await;
        track.stop();
        assert!(track.is_stopped());
    }

    #[tokio::test]
    async fn test_write_sample_dropped_when_muted() {
        let track = make_track().await;
        track.set_enabled(false);

        // Unbound track would error on write; the mute gate drops first.
        let sample = Sample {
            data: Bytes::from_static(&[0u8; 4]),
            duration: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        assert!(track.write_sample(&sample).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_sample_dropped_when_stopped() {
        let track = make_track().await;
        track.stop();

        let sample = Sample {
            data: Bytes::from_static(&[0u8; 4]),
            duration: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        assert!(track.write_sample(&sample).await.is_ok());
    }
}
