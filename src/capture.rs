//! Microphone capture lifecycle
//!
//! Owns the single local capture track: acquire it (idempotently), toggle
//! its enabled flag for mute, and release it so the platform's recording
//! indicator turns off. Mute is only ever the flag; the track, and any
//! links carrying it, are never renegotiated for a mute.

use crate::config::CaptureConstraints;
use crate::engine::{CaptureTrack, MediaEngine};
use crate::error::CaptureError;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the local microphone track and its enabled flag.
pub struct CaptureManager {
    engine: Arc<dyn MediaEngine>,
    constraints: CaptureConstraints,
    track: Option<Arc<dyn CaptureTrack>>,
}

impl CaptureManager {
    /// Manager with no track held.
    pub fn new(engine: Arc<dyn MediaEngine>, constraints: CaptureConstraints) -> Self {
        Self {
            engine,
            constraints,
            track: None,
        }
    }

    /// Acquire the microphone.
    ///
    /// Idempotent: while a live track is held, returns it without touching
    /// the hardware. A track that ended externally (device unplugged, OS
    /// revoked access) does not count; a fresh one is requested. Fresh
    /// tracks arrive disabled.
    ///
    /// # Errors
    ///
    /// Propagates the engine's [`CaptureError`]; the caller decides how to
    /// surface its user-facing message.
    pub async fn acquire(&mut self) -> std::result::Result<Arc<dyn CaptureTrack>, CaptureError> {
        if let Some(track) = &self.track {
            if track.is_live() {
                debug!("capture already live, reusing track");
                return Ok(Arc::clone(track));
            }
            debug!("held capture track ended externally, reacquiring");
        }
        let track = self.engine.acquire_capture(&self.constraints).await?;
        self.track = Some(Arc::clone(&track));
        info!("microphone track acquired");
        Ok(track)
    }

    /// Toggle the capture flag on the held track. No-op without one.
    pub fn set_enabled(&self, enabled: bool) {
        if let Some(track) = &self.track {
            track.set_enabled(enabled);
            debug!(enabled, "capture track toggled");
        }
    }

    /// Whether a live track is held and currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.track.as_ref().is_some_and(|t| t.is_enabled())
    }

    /// Whether a live track is currently held.
    pub fn has_live_track(&self) -> bool {
        self.track.as_ref().is_some_and(|t| t.is_live())
    }

    /// The held track, live or not.
    pub fn track(&self) -> Option<Arc<dyn CaptureTrack>> {
        self.track.clone()
    }

    /// Stop and drop the held track. Idempotent.
    pub fn release(&mut self) {
        if let Some(track) = self.track.take() {
            track.stop();
            info!("microphone track released");
        }
    }
}
