//! Relay adapter
//!
//! Bridges typed [`RelaySignal`]s onto whatever transport carries the
//! room's event stream. The adapter owns exactly one policy: the optional
//! event-name prefix, applied symmetrically on publish and on receive. It
//! never rewrites payloads.

use super::events::{
    AnswerPayload, CandidatePayload, InboundSignal, OfferPayload, RelayFrame, RelaySignal,
    SpeakingPayload, START_SPEAKING, STOP_SPEAKING, VOICE_ANSWER, VOICE_ICE_CANDIDATE, VOICE_OFFER,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// Something that can push one named event with a JSON payload to every
/// other client in the room.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<()>;
}

/// Typed publish/classify layer over a [`RelayTransport`].
#[derive(Clone)]
pub struct RelayAdapter {
    transport: Arc<dyn RelayTransport>,
    prefix: Option<String>,
}

impl RelayAdapter {
    /// Relay over `transport`, applying `prefix` to every event name.
    pub fn new(transport: Arc<dyn RelayTransport>, prefix: Option<String>) -> Self {
        Self { transport, prefix }
    }

    /// Full wire name for a base event, e.g. `voice-offer` ->
    /// `trivia:voice-offer` under the `trivia` prefix.
    pub fn wire_name(&self, base: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, base),
            None => base.to_string(),
        }
    }

    /// Strip the configured prefix from an inbound event name. `None` when
    /// the name does not carry this adapter's prefix.
    pub fn base_name<'a>(&self, wire: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => wire
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(':')),
            None => Some(wire),
        }
    }

    /// Publish one signal to the room.
    pub async fn publish(&self, signal: &RelaySignal) -> Result<()> {
        let payload = signal
            .to_payload()
            .map_err(|e| Error::Signaling(format!("failed to encode {}: {}", signal.event_base(), e)))?;
        self.transport
            .publish(&self.wire_name(signal.event_base()), payload)
            .await
    }

    /// Resolve a raw frame into a typed signal.
    ///
    /// Frames for other event families (foreign prefixes, non-voice events)
    /// return `None` silently; frames that name a voice event but carry a
    /// malformed payload are logged and dropped.
    pub fn classify(&self, frame: &RelayFrame) -> Option<InboundSignal> {
        let base = self.base_name(&frame.event)?;
        let signal = match base {
            VOICE_OFFER => RelaySignal::Offer(self.decode::<OfferPayload>(base, frame)?),
            VOICE_ANSWER => RelaySignal::Answer(self.decode::<AnswerPayload>(base, frame)?),
            VOICE_ICE_CANDIDATE => {
                RelaySignal::Candidate(self.decode::<CandidatePayload>(base, frame)?)
            }
            START_SPEAKING => {
                RelaySignal::StartSpeaking(self.decode::<SpeakingPayload>(base, frame)?)
            }
            STOP_SPEAKING => {
                RelaySignal::StopSpeaking(self.decode::<SpeakingPayload>(base, frame)?)
            }
            _ => return None,
        };
        Some(InboundSignal {
            sender: frame.sender.clone(),
            signal,
        })
    }

    fn decode<T: DeserializeOwned>(&self, event: &str, frame: &RelayFrame) -> Option<T> {
        match serde_json::from_value(frame.payload.clone()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(event, error = %e, "dropping malformed signaling payload");
                None
            }
        }
    }
}
