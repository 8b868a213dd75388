//! Host lifecycle plumbing
//!
//! The embedding host owns the real lifecycle signals (page visibility,
//! user input); this module carries them into the session. Hiding the app
//! releases the microphone and tears the mesh down so the OS recording
//! indicator cannot stay lit in the background; returning re-acquires the
//! microphone muted, never un-muted, so going live again is always an
//! explicit user act.

use tokio::sync::{broadcast, watch};

/// App/page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The app or page is in the foreground.
    Visible,
    /// The app or page is backgrounded or minimized.
    Hidden,
}

/// Receiving ends the session consumes.
pub struct HostHooks {
    /// Visibility transitions, latest value wins.
    pub visibility: watch::Receiver<Visibility>,
    /// User gesture notifications.
    pub gestures: broadcast::Receiver<()>,
}

/// Sending ends the host keeps. Dropping it detaches lifecycle handling;
/// the session keeps running on commands alone.
pub struct HostController {
    visibility: watch::Sender<Visibility>,
    gestures: broadcast::Sender<()>,
}

impl HostController {
    /// Controller plus the hooks a session consumes.
    pub fn new() -> (Self, HostHooks) {
        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
        let (gestures_tx, gestures_rx) = broadcast::channel(8);
        (
            Self {
                visibility: visibility_tx,
                gestures: gestures_tx,
            },
            HostHooks {
                visibility: visibility_rx,
                gestures: gestures_rx,
            },
        )
    }

    /// Report a visibility change. Repeats are fine; the session
    /// deduplicates.
    pub fn set_visibility(&self, visibility: Visibility) {
        let _ = self.visibility.send(visibility);
    }

    /// Report a user gesture (click, tap, key press).
    pub fn gesture(&self) {
        let _ = self.gestures.send(());
    }
}

/// What a visibility transition requires of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Release capture and close every peer link.
    ReleaseAndClose,
    /// Capture was engaged when the app hid: re-acquire it, muted.
    ReacquireMuted,
}

/// Folds visibility reports into actions, remembering across a
/// hide/show cycle whether capture was engaged.
pub struct LifecycleCoordinator {
    current: Visibility,
    engaged_before_hidden: bool,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCoordinator {
    /// Coordinator starting visible with capture not engaged.
    pub fn new() -> Self {
        Self {
            current: Visibility::Visible,
            engaged_before_hidden: false,
        }
    }

    /// Fold in a visibility report. `engaged` is whether a capture track
    /// is held right now. Repeated reports of the current state are
    /// ignored.
    pub fn observe(&mut self, visibility: Visibility, engaged: bool) -> Option<LifecycleAction> {
        if visibility == self.current {
            return None;
        }
        self.current = visibility;
        match visibility {
            Visibility::Hidden => {
                self.engaged_before_hidden = engaged;
                Some(LifecycleAction::ReleaseAndClose)
            }
            Visibility::Visible => self
                .engaged_before_hidden
                .then_some(LifecycleAction::ReacquireMuted),
        }
    }

    /// Last observed visibility.
    pub fn current(&self) -> Visibility {
        self.current
    }
}

/// One-shot listener on the gesture stream.
///
/// Armed on demand; gestures that fired before arming are skipped, the
/// first one after arming consumes the arm. While disarmed, [`fired`]
/// never resolves, which is what a `select!` branch wants.
///
/// [`fired`]: GestureArm::fired
pub struct GestureArm {
    base: broadcast::Receiver<()>,
    armed: Option<broadcast::Receiver<()>>,
}

impl GestureArm {
    /// Disarmed listener over the host gesture stream.
    pub fn new(base: broadcast::Receiver<()>) -> Self {
        Self { base, armed: None }
    }

    /// Listen for the next gesture. Idempotent while armed.
    pub fn arm(&mut self) {
        if self.armed.is_none() {
            self.armed = Some(self.base.resubscribe());
        }
    }

    /// Whether a gesture is currently awaited.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Stop listening without consuming anything.
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    /// Resolve on the next gesture, consuming the arm. Returns `false`
    /// when the host dropped its controller instead.
    pub async fn fired(&mut self) -> bool {
        match self.armed.as_mut() {
            Some(rx) => {
                let fired = match rx.recv().await {
                    // An overflow still proves a gesture happened.
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => false,
                };
                self.armed = None;
                fired
            }
            None => std::future::pending().await,
        }
    }
}
