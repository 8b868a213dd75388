//! Media engine abstraction
//!
//! The voice core orchestrates platform realtime-media primitives; it never
//! implements media transport itself. Everything platform-specific sits
//! behind the traits here: microphone acquisition ([`MediaEngine`] +
//! [`CaptureTrack`]), peer links ([`PeerLink`]), and per-participant audio
//! output ([`PlaybackSink`]). Links report back through a [`ConnectionEvent`]
//! channel owned by the session — no callback-mutated shared objects.
//!
//! Backends:
//! - [`mock`] (feature `mock-engine`): scriptable in-memory engine; what the
//!   crate's own tests run on.
//! - [`webrtc`] (feature `webrtc-backend`): native links via webrtc-rs.

use crate::config::CaptureConstraints;
use crate::error::{CaptureError, PlaybackError};
use crate::room::TransportId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Scriptable in-process engine for tests.
#[cfg(feature = "mock-engine")]
pub mod mock;

/// Native engine backed by the `webrtc` crate.
#[cfg(feature = "webrtc-backend")]
pub mod webrtc;

// ==================== Wire Types ====================

/// Which half of the offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// The initiating description.
    Offer,
    /// The responding description.
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// A session description exchanged during negotiation.
///
/// Opaque to the core: produced and consumed by the engine, relayed as-is.
/// The serialized shape matches the platform session-description JSON
/// (`{ "type": "offer", "sdp": "..." }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    /// Which half of the exchange this is.
    pub kind: SdpKind,
    /// Raw SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Description of kind [`SdpKind::Offer`].
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Description of kind [`SdpKind::Answer`].
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether this is an offer.
    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }

    /// Whether this is an answer.
    pub fn is_answer(&self) -> bool {
        self.kind == SdpKind::Answer
    }
}

/// A discovered network path endpoint exchanged during establishment.
///
/// Field names match the platform candidate-init JSON so candidates can be
/// relayed between heterogeneous clients without translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line itself.
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    /// Media stream identification tag, if the platform supplies one.
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    /// Index of the media description this candidate belongs to.
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate with no mid or line index.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

// ==================== Link State ====================

/// Engine-reported state of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Created, no negotiation started.
    New,
    /// Offer/answer or candidate exchange in progress.
    Negotiating,
    /// Direct audio path established.
    Connected,
    /// The link failed or the remote went away.
    Failed,
    /// Closed locally.
    Closed,
}

impl LinkState {
    /// Whether the link can still become (or is) connected.
    pub fn is_usable(&self) -> bool {
        matches!(self, LinkState::New | LinkState::Negotiating | LinkState::Connected)
    }

    /// Whether the link is finished and should be evicted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Failed | LinkState::Closed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Negotiating => "negotiating",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

// ==================== Link Events ====================

/// Event emitted by a peer link into the session's event channel.
pub enum ConnectionEvent {
    /// The engine discovered a local candidate to relay to the peer.
    LocalCandidate(IceCandidate),
    /// A remote audio track arrived; play it through this sink.
    InboundTrack(Box<dyn PlaybackSink>),
    /// The link's state changed.
    StateChanged(LinkState),
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::LocalCandidate(c) => {
                f.debug_tuple("LocalCandidate").field(&c.candidate).finish()
            }
            ConnectionEvent::InboundTrack(_) => f.write_str("InboundTrack(..)"),
            ConnectionEvent::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
        }
    }
}

/// A [`ConnectionEvent`] tagged with the link it came from.
#[derive(Debug)]
pub struct PeerEvent {
    /// The peer this event concerns.
    pub transport_id: TransportId,
    /// What happened.
    pub event: ConnectionEvent,
}

/// Everything an engine needs to open one peer link.
pub struct LinkRequest {
    /// Remote transport id this link is for.
    pub transport_id: TransportId,
    /// Local capture track whose outbound audio the link carries.
    pub local_track: Arc<dyn CaptureTrack>,
    /// Where the link reports candidates, inbound tracks, and state changes.
    pub events: mpsc::Sender<PeerEvent>,
}

// ==================== Traits ====================

/// Platform media backend: microphone acquisition and peer-link creation.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Request a capability-scoped audio capture track.
    ///
    /// Every call that reaches the engine is a fresh hardware request;
    /// idempotency is the capture manager's job. Fresh tracks start with the
    /// enabled flag **off** — the caller decides when transmission begins.
    ///
    /// # Errors
    ///
    /// A [`CaptureError`] classifying the platform failure; terminal for
    /// this attempt.
    async fn acquire_capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Arc<dyn CaptureTrack>, CaptureError>;

    /// Open a peer link for one remote transport id.
    ///
    /// The local track is attached before any negotiation so the first offer
    /// already advertises outbound audio.
    async fn open_link(&self, request: LinkRequest) -> Result<Box<dyn PeerLink>>;
}

/// One hardware-acquired audio capture track.
///
/// Owned exclusively by the capture manager; everything else only flips or
/// reads the enabled flag. Flipping enabled never touches hardware and never
/// renegotiates a link.
pub trait CaptureTrack: Send + Sync {
    /// Enable or disable transmission. The mute/unmute primitive.
    fn set_enabled(&self, enabled: bool);

    /// Whether transmission is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Stop the track and release the hardware. Irreversible; acquire again
    /// for a fresh track.
    fn stop(&self);

    /// Whether the track is still live (not stopped).
    fn is_live(&self) -> bool;

    /// Downcast support for backends that need their concrete track type.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// One peer link: typed negotiation surface plus close.
///
/// State changes, local candidates, and inbound tracks arrive through the
/// [`ConnectionEvent`] channel given at open time, so the registry never
/// mutates a shared connection object from callbacks.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Current engine-reported state.
    fn state(&self) -> LinkState;

    /// Create an offer and set it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer and produce (and set) the local answer.
    async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription>;

    /// Apply a remote answer to our in-flight offer.
    async fn apply_answer(&self, answer: &SessionDescription) -> Result<()>;

    /// Apply a relayed remote candidate.
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Close the link and free its native resources. Idempotent.
    async fn close(&self);
}

/// Audio output for one remote participant.
///
/// Playback can be refused by platform autoplay policy; the session retries
/// blocked sinks on the next user gesture.
pub trait PlaybackSink: Send + Sync {
    /// Set output volume in `[0.0, 1.0]`.
    fn set_volume(&mut self, volume: f32);

    /// Start playback.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::AutoplayBlocked`] when the platform refuses
    /// unsolicited audio; the caller retries on the next user gesture.
    fn start(&mut self) -> std::result::Result<(), PlaybackError>;

    /// Stop playback. Idempotent.
    fn stop(&mut self);

    /// Whether audio is currently playing.
    fn is_playing(&self) -> bool;
}
