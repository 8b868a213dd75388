//! Signaling over the room's event relay
//!
//! Voice negotiation rides the same broadcast relay the rest of the room
//! uses: five event names, JSON payloads, sender transport id attached by
//! the relay itself. [`RelayAdapter`] does the typed encode/decode and the
//! optional event-name prefixing; [`RelayTransport`] is the seam a host
//! implements to plug in its actual relay connection.

/// Event names and payload types.
pub mod events;
/// The relay seam and its naming transform.
pub mod relay;

/// WebSocket relay transport.
#[cfg(feature = "ws-relay")]
pub mod ws;

pub use events::{
    AnswerPayload, CandidatePayload, InboundSignal, OfferPayload, RelayFrame, RelaySignal,
    SpeakingPayload, START_SPEAKING, STOP_SPEAKING, VOICE_ANSWER, VOICE_ICE_CANDIDATE, VOICE_OFFER,
};
pub use relay::{RelayAdapter, RelayTransport};

#[cfg(feature = "ws-relay")]
pub use ws::WsRelayTransport;
