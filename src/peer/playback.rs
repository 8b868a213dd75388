//! Inbound audio routing
//!
//! Every remote track gets a playback sink at full volume. Platforms may
//! refuse to start audio before the user has interacted with the page;
//! such sinks are parked and retried together on the next user gesture.

use crate::engine::PlaybackSink;
use crate::error::PlaybackError;
use crate::room::TransportId;
use std::collections::HashMap;
use tracing::{debug, info, warn};

struct SinkSlot {
    sink: Box<dyn PlaybackSink>,
    playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How attaching a sink went.
pub enum AttachOutcome {
    /// The sink started immediately.
    Playing,
    /// The sink did not start; it will be retried on the next gesture.
    Blocked,
}

#[derive(Default)]
/// Tracks one playback sink per remote transport, including sinks parked
/// behind an autoplay block.
pub struct PlaybackRouter {
    sinks: HashMap<TransportId, SinkSlot>,
}

impl PlaybackRouter {
    /// Router with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire an inbound track's sink: full volume, then start. A sink that
    /// replaces an earlier one for the same transport stops the old one.
    pub fn attach(&mut self, remote: TransportId, mut sink: Box<dyn PlaybackSink>) -> AttachOutcome {
        sink.set_volume(1.0);
        let playing = match sink.start() {
            Ok(()) => {
                debug!(%remote, "remote audio playing");
                true
            }
            Err(PlaybackError::AutoplayBlocked) => {
                info!(%remote, "playback blocked, waiting for a user gesture");
                false
            }
            Err(e) => {
                warn!(%remote, error = %e, "playback failed to start, will retry on gesture");
                false
            }
        };
        if let Some(mut old) = self.sinks.insert(remote, SinkSlot { sink, playing }) {
            old.sink.stop();
        }
        if playing {
            AttachOutcome::Playing
        } else {
            AttachOutcome::Blocked
        }
    }

    /// Retry every parked sink. Returns the transports that resumed,
    /// sorted.
    pub fn retry_blocked(&mut self) -> Vec<TransportId> {
        let mut resumed = Vec::new();
        for (remote, slot) in self.sinks.iter_mut() {
            if slot.playing {
                continue;
            }
            match slot.sink.start() {
                Ok(()) => {
                    slot.playing = true;
                    resumed.push(remote.clone());
                }
                Err(e) => {
                    debug!(%remote, error = %e, "playback still refused");
                }
            }
        }
        resumed.sort();
        if !resumed.is_empty() {
            info!(count = resumed.len(), "playback resumed after gesture");
        }
        resumed
    }

    /// Stop and drop the sink for one transport.
    pub fn remove(&mut self, remote: &TransportId) -> bool {
        match self.sinks.remove(remote) {
            Some(mut slot) => {
                slot.sink.stop();
                true
            }
            None => false,
        }
    }

    /// Stop and drop every sink.
    pub fn clear(&mut self) {
        for (_, mut slot) in self.sinks.drain() {
            slot.sink.stop();
        }
    }

    /// Whether any sink is parked waiting for a gesture.
    pub fn has_blocked(&self) -> bool {
        self.sinks.values().any(|s| !s.playing)
    }

    /// Number of sinks currently playing.
    pub fn playing_count(&self) -> usize {
        self.sinks.values().filter(|s| s.playing).count()
    }

    /// Total sinks tracked, playing or parked.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are tracked.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
