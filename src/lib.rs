//! Peer-to-peer voice chat for multiplayer party rooms
//!
//! This crate runs the realtime voice subsystem of a party-game client:
//! a full audio mesh between the participants of one room, negotiated
//! over whatever broadcast relay the room already uses for its game
//! events.
//!
//! # Features
//!
//! - **Full-mesh audio**: one peer link per remote transport id, offers
//!   created on unmute, deterministic glare resolution
//! - **Cheap mute**: mute/unmute flips the capture track's enabled flag,
//!   never renegotiates and never touches the hardware
//! - **Relay-agnostic signaling**: five event names over any broadcast
//!   channel, with optional per-game-type prefixing
//! - **Speaking indicators**: start/stop announcements out, the room
//!   authority's aggregated set in
//! - **Lifecycle discipline**: hiding the app releases the microphone and
//!   closes every link; returning re-acquires it muted
//! - **Pluggable media engine**: the WebRTC/capture/playback surface is a
//!   trait, with a scriptable in-memory engine for tests behind the
//!   `mock-engine` feature and a [webrtc](https://crates.io/crates/webrtc)
//!   backend behind `webrtc-backend`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Host (game UI)                                          │
//! │  ↓ commands            ↑ VoiceEvent stream               │
//! │  VoiceSession (single select! loop, owns all state)      │
//! │  ├─ CaptureManager (microphone, enabled flag)            │
//! │  ├─ PeerRegistry (one PeerLink per transport id)         │
//! │  ├─ PlaybackRouter (remote sinks, autoplay retry)        │
//! │  ├─ SpeakingTracker (room-wide speaking set)             │
//! │  └─ RelayAdapter (voice-* events on the room relay)      │
//! │     ↕                                                    │
//! │  RelayTransport / MediaEngine (host-provided seams)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use voicemesh::{LocalIdentity, VoiceConfig, VoiceEvent, VoiceSession};
//! use voicemesh::lifecycle::HostController;
//!
//! let config = VoiceConfig::shared_room("uno");
//! let identity = LocalIdentity::new("room-42", "p-alice", "t-9f2c");
//! let (host, hooks) = HostController::new();
//!
//! // engine, transport and signal stream come from the host platform
//! let (handle, mut events) =
//!     VoiceSession::spawn(config, identity, engine, transport, signals, hooks)?;
//!
//! handle.unmute().await?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         VoiceEvent::SpeakingChanged { speaking } => render_indicators(&speaking),
//!         VoiceEvent::CaptureFailed { message, .. } => show_toast(&message),
//!         _ => {}
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
/// Microphone acquisition and the enabled flag.
pub mod capture;
/// Session configuration.
pub mod config;
/// Media engine seam, wire types, and backends.
pub mod engine;
/// Error types.
pub mod error;
/// Host visibility and gesture plumbing.
pub mod lifecycle;
/// Per-peer link and playback management.
pub mod peer;
/// Rooms, participants, and identity newtypes.
pub mod room;
/// The voice session actor and its handle.
pub mod session;
/// Relay signaling: event names, payloads, transports.
pub mod signaling;
/// Speaking-set mirroring.
pub mod speaking;

// Re-exports for the common embedding path
pub use config::{CaptureConstraints, MutePolicy, VoiceConfig};
pub use error::{CaptureError, Error, PlaybackError, Result};
pub use room::{LocalIdentity, Participant, ParticipantId, RoomId, RoomView, TransportId};
pub use session::{VoiceEvent, VoiceHandle, VoiceSession};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
