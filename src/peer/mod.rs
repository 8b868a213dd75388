//! Per-peer connection state
//!
//! [`PeerRegistry`] keeps the one-link-per-transport invariant and drives
//! negotiation; [`PlaybackRouter`] owns the sinks their inbound audio
//! plays through.

/// Per-peer playback sinks and autoplay recovery.
pub mod playback;
/// Link registry and negotiation state machine.
pub mod registry;

pub use playback::{AttachOutcome, PlaybackRouter};
pub use registry::{LinkDisposition, PeerRegistry};
