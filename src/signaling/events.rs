//! Wire vocabulary for the signaling relay
//!
//! Five event names and their JSON payloads. The sender's transport id is
//! not part of any payload; the relay attaches it out of band and inbound
//! frames surface it separately.

use crate::engine::{IceCandidate, SessionDescription};
use crate::room::{ParticipantId, RoomId, TransportId};
use serde::{Deserialize, Serialize};

/// Base event name for SDP offers.
pub const VOICE_OFFER: &str = "voice-offer";
/// Base event name for SDP answers.
pub const VOICE_ANSWER: &str = "voice-answer";
/// Base event name for trickled ICE candidates.
pub const VOICE_ICE_CANDIDATE: &str = "voice-ice-candidate";
/// Base event name announcing the local participant went live.
pub const START_SPEAKING: &str = "start-speaking";
/// Base event name announcing the local participant muted.
pub const STOP_SPEAKING: &str = "stop-speaking";

/// Payload of a [`VOICE_OFFER`] event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    /// Room the negotiation belongs to.
    pub room_id: RoomId,
    /// The initiating description.
    pub offer: SessionDescription,
    /// Transport the relay should deliver this to.
    pub target_transport_id: TransportId,
}

/// Payload of a [`VOICE_ANSWER`] event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    /// Room the negotiation belongs to.
    pub room_id: RoomId,
    /// The responding description.
    pub answer: SessionDescription,
    /// Transport the relay should deliver this to.
    pub target_transport_id: TransportId,
}

/// Payload of a [`VOICE_ICE_CANDIDATE`] event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    /// Room the negotiation belongs to.
    pub room_id: RoomId,
    /// The trickled candidate.
    pub candidate: IceCandidate,
    /// Transport the relay should deliver this to.
    pub target_transport_id: TransportId,
}

/// Payload of [`START_SPEAKING`] and [`STOP_SPEAKING`] events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeakingPayload {
    /// Room the announcement belongs to.
    pub room_id: RoomId,
    /// Who started or stopped transmitting.
    pub participant_id: ParticipantId,
}

/// One signal in either direction, paired with its base event name.
#[derive(Debug, Clone, PartialEq)]
pub enum RelaySignal {
    /// Initiating description for one peer.
    Offer(OfferPayload),
    /// Responding description for one peer.
    Answer(AnswerPayload),
    /// Trickled candidate for one peer.
    Candidate(CandidatePayload),
    /// The sender began transmitting.
    StartSpeaking(SpeakingPayload),
    /// The sender stopped transmitting.
    StopSpeaking(SpeakingPayload),
}

impl RelaySignal {
    /// The unprefixed event name this signal travels under.
    pub fn event_base(&self) -> &'static str {
        match self {
            RelaySignal::Offer(_) => VOICE_OFFER,
            RelaySignal::Answer(_) => VOICE_ANSWER,
            RelaySignal::Candidate(_) => VOICE_ICE_CANDIDATE,
            RelaySignal::StartSpeaking(_) => START_SPEAKING,
            RelaySignal::StopSpeaking(_) => STOP_SPEAKING,
        }
    }

    /// The room this signal belongs to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            RelaySignal::Offer(p) => &p.room_id,
            RelaySignal::Answer(p) => &p.room_id,
            RelaySignal::Candidate(p) => &p.room_id,
            RelaySignal::StartSpeaking(p) => &p.room_id,
            RelaySignal::StopSpeaking(p) => &p.room_id,
        }
    }

    /// The addressed peer, for the directed negotiation signals.
    pub fn target(&self) -> Option<&TransportId> {
        match self {
            RelaySignal::Offer(p) => Some(&p.target_transport_id),
            RelaySignal::Answer(p) => Some(&p.target_transport_id),
            RelaySignal::Candidate(p) => Some(&p.target_transport_id),
            RelaySignal::StartSpeaking(_) | RelaySignal::StopSpeaking(_) => None,
        }
    }

    /// Serialize the payload for the relay.
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            RelaySignal::Offer(p) => serde_json::to_value(p),
            RelaySignal::Answer(p) => serde_json::to_value(p),
            RelaySignal::Candidate(p) => serde_json::to_value(p),
            RelaySignal::StartSpeaking(p) => serde_json::to_value(p),
            RelaySignal::StopSpeaking(p) => serde_json::to_value(p),
        }
    }
}

/// A raw frame as it arrives from the relay transport, before the event
/// name is resolved against the configured prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Full wire event name, prefix included when one is configured.
    pub event: String,
    /// Transport id of the originating client, attached by the relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<TransportId>,
    /// Untyped payload; decoded once the event is recognized.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A frame that parsed into a known signal.
#[derive(Debug, Clone)]
pub struct InboundSignal {
    /// Originating transport, when the relay stamps one.
    pub sender: Option<TransportId>,
    /// The decoded signal.
    pub signal: RelaySignal,
}
