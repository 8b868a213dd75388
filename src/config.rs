//! Voice mesh configuration
//!
//! Configuration for capture constraints, ICE servers, mute policy, relay
//! event prefixing, and session channel sizing.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Capture constraints requested on every fresh microphone acquisition.
///
/// Serialized field names match the platform `getUserMedia` vocabulary so a
/// thin embedder can pass the struct straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConstraints {
    /// Cancel far-end audio picked up by the microphone.
    pub echo_cancellation: bool,
    /// Suppress steady background noise.
    pub noise_suppression: bool,
    /// Normalize capture loudness automatically.
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// How the public mute toggle maps onto capture and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutePolicy {
    /// Shared-room behavior: capture starts disabled after acquisition and
    /// peer links persist across mute toggles. Muting only flips the track's
    /// enabled flag.
    DefaultMuted,

    /// Legacy behavior: the toggle is bound 1:1 to transmission. Muting
    /// additionally closes every peer link; the next unmute rebuilds the
    /// mesh with fresh offers.
    ToggleBound,
}

impl Default for MutePolicy {
    fn default() -> Self {
        MutePolicy::DefaultMuted
    }
}

/// TURN server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URLs (e.g. "turn:turn.example.com:3478")
    pub urls: Vec<String>,
    /// Username for authentication
    pub username: String,
    /// Credential for authentication
    pub credential: String,
}

/// Configuration for one voice session.
///
/// # Example
///
/// ```
/// use voicemesh::VoiceConfig;
///
/// let config = VoiceConfig::default();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.stun_servers.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// STUN servers for connectivity discovery.
    pub stun_servers: Vec<String>,

    /// TURN servers for relay fallback (optional).
    pub turn_servers: Vec<TurnServerConfig>,

    /// Constraints for microphone acquisition.
    pub capture: CaptureConstraints,

    /// Mute toggle semantics for this room type.
    pub mute_policy: MutePolicy,

    /// Optional room-type tag prefixed onto every relay event name
    /// (e.g. `"uno"` turns `voice-offer` into `uno:voice-offer`). Purely a
    /// naming transform; nothing else branches on it.
    pub event_prefix: Option<String>,

    /// Capacity of the handle-to-session command channel.
    pub command_buffer: usize,

    /// Capacity of the session-to-UI event channel.
    pub event_buffer: usize,

    /// Capacity of the per-session peer event channel (candidates, inbound
    /// tracks, link state changes).
    pub signal_buffer: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            capture: CaptureConstraints::default(),
            mute_policy: MutePolicy::default(),
            event_prefix: None,
            command_buffer: 32,
            event_buffer: 64,
            signal_buffer: 64,
        }
    }
}

impl VoiceConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for a shared game room where several game types multiplex one
    /// relay: events carry the given room-type prefix and capture stays
    /// muted until the participant explicitly unmutes.
    ///
    /// # Example
    ///
    /// ```
    /// use voicemesh::{MutePolicy, VoiceConfig};
    ///
    /// let config = VoiceConfig::shared_room("uno");
    /// assert_eq!(config.mute_policy, MutePolicy::DefaultMuted);
    /// assert_eq!(config.event_prefix.as_deref(), Some("uno"));
    /// ```
    pub fn shared_room(prefix: impl Into<String>) -> Self {
        Self {
            mute_policy: MutePolicy::DefaultMuted,
            event_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Preset reproducing the legacy single-purpose voice screen: no event
    /// prefix, and muting tears the mesh down.
    ///
    /// # Example
    ///
    /// ```
    /// use voicemesh::{MutePolicy, VoiceConfig};
    ///
    /// let config = VoiceConfig::toggle_bound();
    /// assert_eq!(config.mute_policy, MutePolicy::ToggleBound);
    /// assert!(config.event_prefix.is_none());
    /// ```
    pub fn toggle_bound() -> Self {
        Self {
            mute_policy: MutePolicy::ToggleBound,
            ..Default::default()
        }
    }

    /// Set STUN servers.
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Add a TURN server.
    pub fn with_turn_server(
        mut self,
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.turn_servers.push(TurnServerConfig {
            urls,
            username: username.into(),
            credential: credential.into(),
        });
        self
    }

    /// Set the capture constraints.
    pub fn with_capture(mut self, capture: CaptureConstraints) -> Self {
        self.capture = capture;
        self
    }

    /// Set the mute policy.
    pub fn with_mute_policy(mut self, policy: MutePolicy) -> Self {
        self.mute_policy = policy;
        self
    }

    /// Set the relay event prefix.
    pub fn with_event_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.event_prefix = Some(prefix.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when a server URL carries the wrong
    /// scheme, the event prefix is empty or contains whitespace, or a
    /// channel capacity is zero.
    pub fn validate(&self) -> Result<()> {
        for server in &self.stun_servers {
            if !server.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "Invalid STUN server URL: {}",
                    server
                )));
            }
        }

        for turn in &self.turn_servers {
            if turn.urls.is_empty() {
                return Err(Error::InvalidConfig(
                    "TURN server with no URLs".to_string(),
                ));
            }
            for url in &turn.urls {
                if !url.starts_with("turn:") && !url.starts_with("turns:") {
                    return Err(Error::InvalidConfig(format!(
                        "Invalid TURN server URL: {}",
                        url
                    )));
                }
            }
        }

        if let Some(prefix) = &self.event_prefix {
            if prefix.is_empty() {
                return Err(Error::InvalidConfig(
                    "Event prefix must not be empty".to_string(),
                ));
            }
            if prefix.chars().any(char::is_whitespace) {
                return Err(Error::InvalidConfig(format!(
                    "Event prefix must not contain whitespace: {:?}",
                    prefix
                )));
            }
        }

        if self.command_buffer == 0 || self.event_buffer == 0 || self.signal_buffer == 0 {
            return Err(Error::InvalidConfig(
                "Channel capacities must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
