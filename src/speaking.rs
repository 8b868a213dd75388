//! Who is audibly live right now
//!
//! The room authority aggregates everyone's start/stop announcements and
//! pushes the resulting set with each room snapshot; this just deduplicates
//! it. The local participant's own indicator follows the local mute state
//! directly and is filtered out here.

use crate::room::ParticipantId;
use std::collections::HashSet;

/// Mirror of the authority's speaking set, minus the local participant.
pub struct SpeakingTracker {
    local: ParticipantId,
    speaking: HashSet<ParticipantId>,
}

impl SpeakingTracker {
    /// Tracker that filters out `local` from every report.
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            speaking: HashSet::new(),
        }
    }

    /// Replace the set with the authority's latest. Returns whether it
    /// differs from what was already held.
    pub fn apply(&mut self, speaking: HashSet<ParticipantId>) -> bool {
        if speaking == self.speaking {
            return false;
        }
        self.speaking = speaking;
        true
    }

    /// Speaking participants other than the local one, sorted.
    pub fn others(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .speaking
            .iter()
            .filter(|p| **p != self.local)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Whether a participant is in the current set.
    pub fn is_speaking(&self, id: &ParticipantId) -> bool {
        self.speaking.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<ParticipantId> {
        ids.iter().map(|id| ParticipantId::new(*id)).collect()
    }

    #[test]
    fn test_apply_reports_changes_only() {
        let mut tracker = SpeakingTracker::new(ParticipantId::new("p-me"));
        assert!(tracker.apply(set(&["p-1"])));
        assert!(!tracker.apply(set(&["p-1"])));
        assert!(tracker.apply(set(&["p-1", "p-2"])));
        assert!(tracker.apply(set(&[])));
    }

    #[test]
    fn test_others_excludes_local_and_sorts() {
        let mut tracker = SpeakingTracker::new(ParticipantId::new("p-me"));
        tracker.apply(set(&["p-zeta", "p-me", "p-alpha"]));
        assert_eq!(
            tracker.others(),
            vec![ParticipantId::new("p-alpha"), ParticipantId::new("p-zeta")]
        );
    }

    #[test]
    fn test_is_speaking_sees_the_raw_set() {
        let mut tracker = SpeakingTracker::new(ParticipantId::new("p-me"));
        tracker.apply(set(&["p-me"]));
        assert!(tracker.is_speaking(&ParticipantId::new("p-me")));
        assert!(tracker.others().is_empty());
    }
}
