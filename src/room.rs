//! Room, participant, and transport identity types
//!
//! Connections are keyed by [`TransportId`] (volatile, relay-assigned, changes
//! on reconnect). [`ParticipantId`] is the stable room-scoped identity used
//! for UI correlation (speaking indicators) and must be mapped to a
//! `TransportId` before any connection operation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identifier for a game room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

/// Stable, room-scoped participant identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

/// Volatile transport identity assigned by the relay; changes on reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Wrap a raw id string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(RoomId);
string_id!(ParticipantId);
string_id!(TransportId);

impl TransportId {
    /// Generate a random transport id.
    ///
    /// Useful for embedders whose relay does not assign ids, and for test
    /// fixtures.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// One member of a room, as published by the room authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Stable identity, for UI correlation.
    pub participant_id: ParticipantId,
    /// Current transport identity, for connections.
    pub transport_id: TransportId,
    /// Name shown to other participants.
    pub display_name: String,
}

impl Participant {
    /// Build a participant record.
    pub fn new(
        participant_id: impl Into<ParticipantId>,
        transport_id: impl Into<TransportId>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            transport_id: transport_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// The local client's identity within one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// The joined room.
    pub room_id: RoomId,
    /// Local stable identity.
    pub participant_id: ParticipantId,
    /// Local transport identity, as assigned by the relay.
    pub transport_id: TransportId,
}

impl LocalIdentity {
    /// Build the local identity triple.
    pub fn new(
        room_id: impl Into<RoomId>,
        participant_id: impl Into<ParticipantId>,
        transport_id: impl Into<TransportId>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            transport_id: transport_id.into(),
        }
    }
}

/// Snapshot of room state pushed by the external room authority.
///
/// Refreshed wholesale on every push; the voice core never mutates it, only
/// reads membership and the speaking set from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    /// The room this snapshot describes.
    pub room_id: RoomId,
    /// Full current membership.
    pub participants: Vec<Participant>,
    /// Participants currently transmitting, as aggregated by the authority.
    #[serde(default)]
    pub speaking: HashSet<ParticipantId>,
}

impl RoomView {
    /// Empty snapshot for a room.
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            participants: Vec::new(),
            speaking: HashSet::new(),
        }
    }

    /// Replace the membership list.
    pub fn with_participants(mut self, participants: Vec<Participant>) -> Self {
        self.participants = participants;
        self
    }

    /// Replace the speaking set.
    pub fn with_speaking(mut self, speaking: impl IntoIterator<Item = ParticipantId>) -> Self {
        self.speaking = speaking.into_iter().collect();
        self
    }

    /// Current transport id for a participant, if they are in the room.
    pub fn transport_of(&self, participant_id: &ParticipantId) -> Option<&TransportId> {
        self.participants
            .iter()
            .find(|p| &p.participant_id == participant_id)
            .map(|p| &p.transport_id)
    }

    /// Participant owning a transport id, if any.
    pub fn participant_of(&self, transport_id: &TransportId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| &p.transport_id == transport_id)
    }

    /// Transport ids of every participant except `local`.
    pub fn peer_transports(&self, local: &TransportId) -> Vec<TransportId> {
        self.participants
            .iter()
            .filter(|p| &p.transport_id != local)
            .map(|p| p.transport_id.clone())
            .collect()
    }

    /// All transport ids currently in the room.
    pub fn transport_ids(&self) -> HashSet<TransportId> {
        self.participants
            .iter()
            .map(|p| p.transport_id.clone())
            .collect()
    }

    /// Whether a transport id belongs to a current member.
    pub fn contains_transport(&self, transport_id: &TransportId) -> bool {
        self.participants
            .iter()
            .any(|p| &p.transport_id == transport_id)
    }

    /// Number of participants in the snapshot.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the room has no participants.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> RoomView {
        RoomView::new("room-1").with_participants(vec![
            Participant::new("alice", "t-alice", "Alice"),
            Participant::new("bob", "t-bob", "Bob"),
            Participant::new("carol", "t-carol", "Carol"),
        ])
    }

    #[test]
    fn test_id_display_round_trip() {
        let id = TransportId::new("t-42");
        assert_eq!(id.to_string(), "t-42");
        assert_eq!(id.as_str(), "t-42");
        assert_eq!(TransportId::from("t-42"), id);
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let id = ParticipantId::new("alice");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alice\"");
        let back: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_random_transport_ids_are_unique() {
        let a = TransportId::random();
        let b = TransportId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transport_lookup() {
        let view = view();
        assert_eq!(
            view.transport_of(&"bob".into()),
            Some(&TransportId::new("t-bob"))
        );
        assert!(view.transport_of(&"mallory".into()).is_none());
    }

    #[test]
    fn test_participant_lookup_by_transport() {
        let view = view();
        let p = view.participant_of(&"t-carol".into()).unwrap();
        assert_eq!(p.participant_id, "carol".into());
        assert_eq!(p.display_name, "Carol");
    }

    #[test]
    fn test_peer_transports_excludes_local() {
        let view = view();
        let peers = view.peer_transports(&"t-alice".into());
        assert_eq!(peers.len(), 2);
        assert!(!peers.contains(&"t-alice".into()));
    }

    #[test]
    fn test_view_serde_uses_camel_case() {
        let view = view();
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("roomId").is_some());
        let first = &json["participants"][0];
        assert!(first.get("participantId").is_some());
        assert!(first.get("transportId").is_some());
        assert!(first.get("displayName").is_some());
    }

    #[test]
    fn test_view_speaking_defaults_empty() {
        let json = serde_json::json!({
            "roomId": "room-1",
            "participants": [],
        });
        let view: RoomView = serde_json::from_value(json).unwrap();
        assert!(view.speaking.is_empty());
    }
}
