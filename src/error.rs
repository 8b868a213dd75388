//! Error types for the voice mesh
//!
//! Three families, mirroring how failures are handled:
//!
//! - [`CaptureError`]: terminal for one acquisition attempt; carries an
//!   actionable user-facing message via [`CaptureError::user_message`].
//! - Negotiation and relay variants of [`Error`]: recovered locally — the
//!   session logs them and moves on, because one peer's failure must not
//!   disrupt the rest of the mesh.
//! - [`PlaybackError`]: autoplay refusals are retried on the next user
//!   gesture rather than surfaced.

use thiserror::Error;

/// Result type alias for voice mesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voice mesh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Microphone capture failed.
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// Signaling relay error (publish failed, malformed frame).
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// No registered connection for a transport id.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Session description could not be created or applied.
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate could not be applied.
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Audio playback failed.
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Media engine failure outside the other categories.
    #[error("Media engine error: {0}")]
    Engine(String),

    /// A session channel closed (handle used after teardown).
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error is absorbed by the session (logged, not surfaced).
    ///
    /// Late answers, stray candidates, and per-peer negotiation failures are
    /// local no-ops; they never take the mesh or the game down.
    pub fn is_recovered_locally(&self) -> bool {
        matches!(
            self,
            Error::Signaling(_)
                | Error::PeerNotFound(_)
                | Error::Sdp(_)
                | Error::IceCandidate(_)
                | Error::Playback(_)
        )
    }

    /// Whether this error originated from microphone capture.
    pub fn is_capture_error(&self) -> bool {
        matches!(self, Error::Capture(_))
    }

    /// Whether this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

/// Microphone acquisition failures, mapped from the underlying platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or platform denied microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No capture device is present.
    #[error("no capture device found")]
    DeviceNotFound,

    /// The device exists but is held by another application.
    #[error("capture device busy")]
    DeviceBusy,

    /// The platform cannot satisfy the requested capture constraints.
    #[error("capture not supported on this platform")]
    Unsupported,

    /// Anything the platform did not classify.
    #[error("capture failed: {0}")]
    Unknown(String),
}

impl CaptureError {
    /// Map a platform error name (and detail) to a capture error.
    ///
    /// Browser engines report `getUserMedia` failures through a small set of
    /// error names; native backends can reuse the same vocabulary.
    pub fn from_platform_name(name: &str, detail: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => CaptureError::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" => CaptureError::DeviceNotFound,
            "NotReadableError" | "TrackStartError" => CaptureError::DeviceBusy,
            "NotSupportedError" => CaptureError::Unsupported,
            _ => CaptureError::Unknown(detail.to_string()),
        }
    }

    /// Actionable message to show the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone permission denied. Please allow microphone access in your settings."
            }
            CaptureError::DeviceNotFound => {
                "No microphone found. Please connect a microphone and try again."
            }
            CaptureError::DeviceBusy => "Microphone is already in use by another application.",
            CaptureError::Unsupported => "Voice chat is not supported on this device.",
            CaptureError::Unknown(_) => {
                "Could not access the microphone. Please check your audio settings."
            }
        }
    }
}

/// Audio playback failures for a remote participant's sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// The platform refused to start unsolicited audio; retry on the next
    /// user gesture.
    #[error("autoplay blocked by platform policy")]
    AutoplayBlocked,

    /// The sink failed outright.
    #[error("playback failed: {0}")]
    Failed(String),
}

impl PlaybackError {
    /// Whether this failure is the autoplay-policy rejection.
    pub fn is_autoplay_blocked(&self) -> bool {
        matches!(self, PlaybackError::AutoplayBlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("empty STUN server list".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: empty STUN server list"
        );
    }

    #[test]
    fn test_recovered_locally_classification() {
        assert!(Error::PeerNotFound("t-1".to_string()).is_recovered_locally());
        assert!(Error::Sdp("stale description".to_string()).is_recovered_locally());
        assert!(Error::Playback(PlaybackError::AutoplayBlocked).is_recovered_locally());
        assert!(!Error::Capture(CaptureError::PermissionDenied).is_recovered_locally());
        assert!(!Error::InvalidConfig("bad".to_string()).is_recovered_locally());
    }

    #[test]
    fn test_capture_error_classification() {
        let err = Error::Capture(CaptureError::DeviceBusy);
        assert!(err.is_capture_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_platform_name_mapping() {
        assert_eq!(
            CaptureError::from_platform_name("NotAllowedError", ""),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            CaptureError::from_platform_name("PermissionDeniedError", ""),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            CaptureError::from_platform_name("NotFoundError", ""),
            CaptureError::DeviceNotFound
        );
        assert_eq!(
            CaptureError::from_platform_name("TrackStartError", ""),
            CaptureError::DeviceBusy
        );
        assert_eq!(
            CaptureError::from_platform_name("SomethingElse", "boom"),
            CaptureError::Unknown("boom".to_string())
        );
    }

    #[test]
    fn test_user_messages_distinguish_cases() {
        let variants = [
            CaptureError::PermissionDenied,
            CaptureError::DeviceNotFound,
            CaptureError::DeviceBusy,
            CaptureError::Unsupported,
            CaptureError::Unknown("x".to_string()),
        ];
        let mut messages: Vec<&str> = variants.iter().map(|v| v.user_message()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), variants.len());
    }

    #[test]
    fn test_capture_error_conversion() {
        let err: Error = CaptureError::DeviceNotFound.into();
        assert!(matches!(err, Error::Capture(CaptureError::DeviceNotFound)));
    }

    #[test]
    fn test_playback_blocked_predicate() {
        assert!(PlaybackError::AutoplayBlocked.is_autoplay_blocked());
        assert!(!PlaybackError::Failed("x".to_string()).is_autoplay_blocked());
    }
}
