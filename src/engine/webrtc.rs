//! Native peer links via webrtc-rs.
//!
//! [`WebRtcEngine`] implements [`MediaEngine`] on top of the `webrtc` crate:
//! one `RTCPeerConnection` per remote transport, a shared
//! `TrackLocalStaticSample` carrying locally produced Opus frames, and a
//! per-track RTP reader surfacing remote audio as [`RemoteAudioFrame`]s.
//!
//! The engine moves encoded Opus. Capture-side processing and playout-side
//! decoding belong to the embedder: feed outbound audio through
//! [`LocalOpusTrack::write_frame`], drain inbound audio from the receiver
//! returned by [`WebRtcEngine::new`].

use crate::config::{CaptureConstraints, VoiceConfig};
use crate::engine::{
    CaptureTrack, ConnectionEvent, IceCandidate, LinkRequest, LinkState, MediaEngine, PeerEvent,
    PeerLink, PlaybackSink, SessionDescription,
};
use crate::error::{CaptureError, PlaybackError};
use crate::room::TransportId;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection as WebRTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Opus clock rate advertised on every outbound track.
const OPUS_CLOCK_RATE: u32 = 48_000;

/// Voice is mono; stereo capture is downmixed before encoding.
const OPUS_CHANNELS: u16 = 1;

/// Inbound audio frames buffered before the forwarders start dropping.
const AUDIO_CHANNEL_CAPACITY: usize = 256;

// LinkState packed into an AtomicU8 so `PeerLink::state` stays sync.
fn encode_state(state: LinkState) -> u8 {
    match state {
        LinkState::New => 0,
        LinkState::Negotiating => 1,
        LinkState::Connected => 2,
        LinkState::Failed => 3,
        LinkState::Closed => 4,
    }
}

fn decode_state(bits: u8) -> LinkState {
    match bits {
        0 => LinkState::New,
        1 => LinkState::Negotiating,
        2 => LinkState::Connected,
        3 => LinkState::Failed,
        _ => LinkState::Closed,
    }
}

// ==================== Inbound Audio ====================

/// One encoded Opus frame received from a remote participant.
///
/// Payloads are forwarded exactly as they arrived on the wire; `volume` is
/// the playback sink's gain sampled at forward time, for the playout mixer.
#[derive(Debug, Clone)]
pub struct RemoteAudioFrame {
    /// Transport the frame arrived from.
    pub transport_id: TransportId,
    /// Encoded Opus payload.
    pub payload: Bytes,
    /// RTP sequence number, for loss concealment.
    pub sequence: u16,
    /// RTP timestamp in the 48 kHz Opus clock.
    pub timestamp: u32,
    /// Sink gain in `[0.0, 1.0]` at the time the frame was forwarded.
    pub volume: f32,
}

// ==================== Capture Track ====================

/// Locally produced Opus audio, shared across every peer link.
///
/// One `TrackLocalStaticSample` is added to each `RTCPeerConnection`, so a
/// single encoded frame fans out to the whole mesh. The enabled flag gates
/// [`write_frame`](LocalOpusTrack::write_frame): muting drops frames at the
/// source and never renegotiates a link.
pub struct LocalOpusTrack {
    inner: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl LocalOpusTrack {
    fn new() -> Arc<Self> {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: OPUS_CHANNELS,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("audio-{}", uuid::Uuid::new_v4()),
            "voicemesh".to_string(),
        ));

        Arc::new(Self {
            inner,
            enabled: AtomicBool::new(false),
            live: AtomicBool::new(true),
        })
    }

    fn inner(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.inner)
    }

    /// Write one encoded Opus frame to every bound peer connection.
    ///
    /// Frames are dropped silently while the track is disabled or stopped.
    ///
    /// # Arguments
    ///
    /// * `payload` - Encoded Opus frame
    /// * `duration` - Frame duration (typically 20ms)
    ///
    /// # Errors
    ///
    /// [`Error::Engine`] if the underlying track rejects the sample.
    pub async fn write_frame(&self, payload: Bytes, duration: Duration) -> Result<()> {
        if !self.live.load(Ordering::SeqCst) || !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let sample = Sample {
            data: payload,
            duration,
            timestamp: std::time::SystemTime::now(),
            ..Default::default()
        };

        self.inner
            .write_sample(&sample)
            .await
            .map_err(|e| Error::Engine(format!("Failed to write audio sample: {}", e)))?;

        Ok(())
    }
}

impl CaptureTrack for LocalOpusTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ==================== Playback Sink ====================

struct SinkShared {
    playing: AtomicBool,
    volume_bits: AtomicU32,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }
}

/// Playback gate for one remote audio track.
///
/// Native playout has no autoplay policy, so [`PlaybackSink::start`] never
/// refuses. The sink gates the RTP forwarder: while stopped, inbound frames
/// are drained and discarded instead of forwarded.
pub struct WebRtcSink {
    transport_id: TransportId,
    shared: Arc<SinkShared>,
}

impl PlaybackSink for WebRtcSink {
    fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared.volume_bits.store(clamped.to_bits(), Ordering::SeqCst);
    }

    fn start(&mut self) -> std::result::Result<(), PlaybackError> {
        debug!(transport_id = %self.transport_id, "Starting native playback");
        self.shared.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        debug!(transport_id = %self.transport_id, "Stopping native playback");
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }
}

// ==================== Peer Link ====================

struct WebRtcLink {
    transport_id: TransportId,
    pc: Arc<WebRTCPeerConnection>,
    state: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    fn state(&self) -> LinkState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.state
            .store(encode_state(LinkState::Negotiating), Ordering::SeqCst);

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local = self.pc.local_description().await.ok_or_else(|| {
            Error::Sdp("No local description after setting offer".to_string())
        })?;

        debug!(transport_id = %self.transport_id, "Created offer");

        Ok(SessionDescription::offer(local.sdp))
    }

    async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription> {
        if !offer.is_offer() {
            return Err(Error::Sdp(format!(
                "Expected an offer, got {}",
                offer.kind
            )));
        }

        self.state
            .store(encode_state(LinkState::Negotiating), Ordering::SeqCst);

        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| Error::Sdp(format!("Failed to parse offer: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let local = self.pc.local_description().await.ok_or_else(|| {
            Error::Sdp("No local description after setting answer".to_string())
        })?;

        debug!(transport_id = %self.transport_id, "Created answer");

        Ok(SessionDescription::answer(local.sdp))
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<()> {
        if !answer.is_answer() {
            return Err(Error::Sdp(format!(
                "Expected an answer, got {}",
                answer.kind
            )));
        }

        let remote = RTCSessionDescription::answer(answer.sdp.clone())
            .map_err(|e| Error::Sdp(format!("Failed to parse answer: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;

        debug!(transport_id = %self.transport_id, "Applied answer");

        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))?;

        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.state
            .store(encode_state(LinkState::Closed), Ordering::SeqCst);

        info!(transport_id = %self.transport_id, "Closing native peer link");

        if let Err(e) = self.pc.close().await {
            warn!(transport_id = %self.transport_id, "Error closing peer connection: {}", e);
        }
    }
}

// ==================== Engine ====================

/// [`MediaEngine`] backed by webrtc-rs.
///
/// Holds the resolved ICE server list and the inbound-audio channel; each
/// [`open_link`](MediaEngine::open_link) builds a fresh API stack and peer
/// connection, mirroring how links come and go with the roster.
pub struct WebRtcEngine {
    ice_servers: Vec<RTCIceServer>,
    audio_tx: mpsc::Sender<RemoteAudioFrame>,
}

impl WebRtcEngine {
    /// Create an engine from the voice configuration.
    ///
    /// Returns the engine plus the receiver for inbound audio frames.
    /// Dropping the receiver stops inbound forwarding on every link.
    pub fn new(config: &VoiceConfig) -> (Self, mpsc::Receiver<RemoteAudioFrame>) {
        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: turn.urls.clone(),
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);

        (
            Self {
                ice_servers,
                audio_tx,
            },
            audio_rx,
        )
    }

    async fn build_peer_connection(&self) -> Result<Arc<WebRTCPeerConnection>> {
        let mut media_engine = RtcMediaEngine::default();

        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Engine(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Engine(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| Error::Engine(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn acquire_capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Arc<dyn CaptureTrack>, CaptureError> {
        // Processing constraints are advisory here: the embedder owns the
        // microphone pipeline and feeds already-encoded frames in.
        debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "Acquiring Opus capture track"
        );

        Ok(LocalOpusTrack::new())
    }

    async fn open_link(&self, request: LinkRequest) -> Result<Box<dyn PeerLink>> {
        let LinkRequest {
            transport_id,
            local_track,
            events,
        } = request;

        let opus_track = local_track
            .as_any()
            .downcast_ref::<LocalOpusTrack>()
            .ok_or_else(|| {
                Error::Engine("capture track was not produced by this engine".to_string())
            })?
            .inner();

        info!(transport_id = %transport_id, "Opening native peer link");

        let pc = self.build_peer_connection().await?;

        pc.add_track(opus_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Engine(format!("Failed to add audio track: {}", e)))?;

        let state = Arc::new(AtomicU8::new(encode_state(LinkState::New)));
        let closed = Arc::new(AtomicBool::new(false));

        // Local candidates go straight into the session's event channel.
        {
            let events = events.clone();
            let transport_id = transport_id.clone();

            pc.on_ice_candidate(Box::new(move |candidate| {
                let events = events.clone();
                let transport_id = transport_id.clone();

                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(json) => {
                                let event = PeerEvent {
                                    transport_id: transport_id.clone(),
                                    event: ConnectionEvent::LocalCandidate(IceCandidate {
                                        candidate: json.candidate,
                                        sdp_mid: json.sdp_mid,
                                        sdp_mline_index: json.sdp_mline_index,
                                    }),
                                };

                                if events.send(event).await.is_err() {
                                    debug!(
                                        transport_id = %transport_id,
                                        "Session gone; dropping local candidate"
                                    );
                                }
                            }
                            Err(e) => {
                                warn!(
                                    transport_id = %transport_id,
                                    "Failed to serialize local candidate: {}", e
                                );
                            }
                        }
                    }
                })
            }));
        }

        // State transitions, deduplicated against the link's own cell.
        {
            let events = events.clone();
            let transport_id = transport_id.clone();
            let state = Arc::clone(&state);
            let closed = Arc::clone(&closed);

            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = events.clone();
                let transport_id = transport_id.clone();
                let state = Arc::clone(&state);
                let closed = Arc::clone(&closed);

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => LinkState::New,
                        RTCPeerConnectionState::Connecting => LinkState::Negotiating,
                        RTCPeerConnectionState::Connected => LinkState::Connected,
                        // A disconnected mesh peer is not recoverable here;
                        // report it as failed so the registry evicts the link.
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed => LinkState::Failed,
                        RTCPeerConnectionState::Closed => LinkState::Closed,
                        _ => return,
                    };

                    let old = decode_state(state.swap(encode_state(new_state), Ordering::SeqCst));
                    if old == new_state {
                        return;
                    }

                    debug!(
                        transport_id = %transport_id,
                        "Link state {} -> {}", old, new_state
                    );

                    // A locally closed link was already evicted; stay silent.
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }

                    let event = PeerEvent {
                        transport_id: transport_id.clone(),
                        event: ConnectionEvent::StateChanged(new_state),
                    };

                    if events.send(event).await.is_err() {
                        debug!(transport_id = %transport_id, "Session gone; dropping state change");
                    }
                })
            }));
        }

        // Inbound tracks: hand the session a sink, then pump RTP until the
        // track ends. The pump always drains; the sink decides forwarding.
        {
            let events = events.clone();
            let transport_id = transport_id.clone();
            let audio_tx = self.audio_tx.clone();

            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let transport_id = transport_id.clone();
                let audio_tx = audio_tx.clone();

                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        debug!(transport_id = %transport_id, "Ignoring non-audio track");
                        return;
                    }

                    info!(transport_id = %transport_id, "Inbound audio track");

                    let shared = Arc::new(SinkShared::new());
                    let sink = WebRtcSink {
                        transport_id: transport_id.clone(),
                        shared: Arc::clone(&shared),
                    };

                    {
                        let transport_id = transport_id.clone();
                        let shared = Arc::clone(&shared);

                        tokio::spawn(async move {
                            loop {
                                let (rtp_packet, _) = match track.read_rtp().await {
                                    Ok(packet) => packet,
                                    Err(e) => {
                                        debug!(
                                            transport_id = %transport_id,
                                            "RTP read ended: {}", e
                                        );
                                        break;
                                    }
                                };

                                if !shared.playing.load(Ordering::SeqCst) {
                                    continue;
                                }

                                let frame = RemoteAudioFrame {
                                    transport_id: transport_id.clone(),
                                    payload: rtp_packet.payload,
                                    sequence: rtp_packet.header.sequence_number,
                                    timestamp: rtp_packet.header.timestamp,
                                    volume: shared.volume(),
                                };

                                match audio_tx.try_send(frame) {
                                    Ok(()) => {}
                                    Err(TrySendError::Full(_)) => {
                                        // Never stall RTP reads on a slow
                                        // consumer; realtime audio drops.
                                        debug!(
                                            transport_id = %transport_id,
                                            "Audio consumer lagging; dropping frame"
                                        );
                                    }
                                    Err(TrySendError::Closed(_)) => break,
                                }
                            }
                        });
                    }

                    let event = PeerEvent {
                        transport_id: transport_id.clone(),
                        event: ConnectionEvent::InboundTrack(Box::new(sink)),
                    };

                    if events.send(event).await.is_err() {
                        debug!(transport_id = %transport_id, "Session gone; dropping inbound track");
                    }
                })
            }));
        }

        Ok(Box::new(WebRtcLink {
            transport_id,
            pc,
            state,
            closed,
        }))
    }
}
