//! Scriptable in-memory media engine
//!
//! Drives the mesh logic without any platform media: acquisition outcomes
//! and hardware-request counts are scripted and observable, links record
//! their negotiation transcript in order, and sinks can refuse a configured
//! number of starts to exercise the autoplay-recovery path.
//!
//! By default a link "connects" as soon as the answer flows (the offerer
//! applies it, the responder produces it): it emits
//! [`LinkState::Connected`] followed by an inbound track, which is how the
//! integration harness converges a mesh deterministically. Disable with
//! [`MockEngine::set_auto_connect`] to drive states by hand.

use super::{
    CaptureTrack, ConnectionEvent, IceCandidate, LinkRequest, LinkState, MediaEngine, PeerEvent,
    PeerLink, PlaybackSink, SessionDescription,
};
use crate::config::CaptureConstraints;
use crate::error::{CaptureError, PlaybackError};
use crate::room::TransportId;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ==================== Capture ====================

/// In-memory capture track. Fresh tracks start disabled and live.
#[derive(Debug, Default)]
pub struct MockCaptureTrack {
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MockCaptureTrack {
    /// Fresh track: live, disabled.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            live: AtomicBool::new(true),
        })
    }
}

impl CaptureTrack for MockCaptureTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ==================== Playback ====================

#[derive(Debug)]
struct MockSinkState {
    volume: Mutex<f32>,
    playing: AtomicBool,
    stopped: AtomicBool,
    remaining_refusals: AtomicUsize,
    start_calls: AtomicUsize,
}

/// Playback sink whose first N `start()` calls are refused as
/// autoplay-blocked.
pub struct MockSink {
    state: Arc<MockSinkState>,
}

impl MockSink {
    /// Standalone sink plus its inspection handle, for tests that do not
    /// go through a link.
    pub fn standalone(transport_id: TransportId, refusals: usize) -> (Self, MockSinkHandle) {
        let state = Arc::new(MockSinkState {
            volume: Mutex::new(0.0),
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            remaining_refusals: AtomicUsize::new(refusals),
            start_calls: AtomicUsize::new(0),
        });
        let handle = MockSinkHandle {
            transport_id,
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }
}

impl PlaybackSink for MockSink {
    fn set_volume(&mut self, volume: f32) {
        *self.state.volume.lock().unwrap() = volume;
    }

    fn start(&mut self) -> std::result::Result<(), PlaybackError> {
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.state.remaining_refusals.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .remaining_refusals
                .store(remaining - 1, Ordering::SeqCst);
            return Err(PlaybackError::AutoplayBlocked);
        }
        self.state.playing.store(true, Ordering::SeqCst);
        self.state.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }
}

/// Inspection handle for one created sink.
#[derive(Clone)]
pub struct MockSinkHandle {
    transport_id: TransportId,
    state: Arc<MockSinkState>,
}

impl MockSinkHandle {
    /// The peer this sink renders.
    pub fn transport_id(&self) -> &TransportId {
        &self.transport_id
    }

    /// Last volume set.
    pub fn volume(&self) -> f32 {
        *self.state.volume.lock().unwrap()
    }

    /// Whether the sink is currently rendering.
    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::SeqCst)
    }

    /// Whether the sink was explicitly stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// How many times `start` was attempted, refusals included.
    pub fn start_calls(&self) -> usize {
        self.state.start_calls.load(Ordering::SeqCst)
    }
}

// ==================== Links ====================

struct MockLinkInner {
    transport_id: TransportId,
    state: Mutex<LinkState>,
    offers_created: AtomicUsize,
    received_offers: Mutex<Vec<SessionDescription>>,
    received_answers: Mutex<Vec<SessionDescription>>,
    received_candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
    fail_negotiation: AtomicBool,
    connect_emitted: AtomicBool,
    // snapshot of engine scripting at open time
    auto_connect: bool,
    candidates_per_link: usize,
    autoplay_refusals: usize,
    events: mpsc::Sender<PeerEvent>,
    sinks: Arc<Mutex<Vec<MockSinkHandle>>>,
    sdp_counter: Arc<AtomicUsize>,
}

impl MockLinkInner {
    fn send_event(&self, event: ConnectionEvent) {
        // The session loop drains this channel; during a handler the send
        // just queues. Full or closed channels are a test-setup problem.
        let _ = self.events.try_send(PeerEvent {
            transport_id: self.transport_id.clone(),
            event,
        });
    }

    fn emit_local_candidates(&self) {
        for i in 0..self.candidates_per_link {
            let candidate = IceCandidate {
                candidate: format!("candidate:mock-{}-{}", self.transport_id, i),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            };
            self.send_event(ConnectionEvent::LocalCandidate(candidate));
        }
    }

    fn next_sdp(&self, label: &str) -> String {
        let n = self.sdp_counter.fetch_add(1, Ordering::SeqCst);
        format!("v=0 o=mock {} {} m=audio", n, label)
    }

    fn finish_connect(&self) {
        if self.connect_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock().unwrap() = LinkState::Connected;
        self.send_event(ConnectionEvent::StateChanged(LinkState::Connected));
        self.emit_inbound_track();
    }

    fn emit_inbound_track(&self) {
        let state = Arc::new(MockSinkState {
            volume: Mutex::new(0.0),
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            remaining_refusals: AtomicUsize::new(self.autoplay_refusals),
            start_calls: AtomicUsize::new(0),
        });
        self.sinks.lock().unwrap().push(MockSinkHandle {
            transport_id: self.transport_id.clone(),
            state: Arc::clone(&state),
        });
        self.send_event(ConnectionEvent::InboundTrack(Box::new(MockSink { state })));
    }

    fn check_failure(&self, what: &str) -> Result<()> {
        if self.fail_negotiation.load(Ordering::SeqCst) {
            return Err(Error::Sdp(format!(
                "scripted {} failure for {}",
                what, self.transport_id
            )));
        }
        Ok(())
    }
}

/// In-memory peer link with a recorded negotiation transcript.
pub struct MockLink {
    inner: Arc<MockLinkInner>,
}

#[async_trait]
impl PeerLink for MockLink {
    fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.inner.check_failure("offer")?;
        self.inner.offers_created.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock().unwrap() = LinkState::Negotiating;
        let offer = SessionDescription::offer(self.inner.next_sdp("offer"));
        self.inner.emit_local_candidates();
        Ok(offer)
    }

    async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription> {
        self.inner.check_failure("answer")?;
        self.inner
            .received_offers
            .lock()
            .unwrap()
            .push(offer.clone());
        *self.inner.state.lock().unwrap() = LinkState::Negotiating;
        let answer = SessionDescription::answer(self.inner.next_sdp("answer"));
        self.inner.emit_local_candidates();
        if self.inner.auto_connect {
            self.inner.finish_connect();
        }
        Ok(answer)
    }

    async fn apply_answer(&self, answer: &SessionDescription) -> Result<()> {
        self.inner.check_failure("answer application")?;
        self.inner
            .received_answers
            .lock()
            .unwrap()
            .push(answer.clone());
        if self.inner.auto_connect {
            self.inner.finish_connect();
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.inner.check_failure("candidate")?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::IceCandidate(format!(
                "link to {} is closed",
                self.inner.transport_id
            )));
        }
        self.inner
            .received_candidates
            .lock()
            .unwrap()
            .push(candidate.clone());
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        *self.inner.state.lock().unwrap() = LinkState::Closed;
    }
}

/// Inspection and scripting handle for one opened link.
#[derive(Clone)]
pub struct MockLinkHandle {
    inner: Arc<MockLinkInner>,
}

impl MockLinkHandle {
    /// The remote transport this link targets.
    pub fn transport_id(&self) -> &TransportId {
        &self.inner.transport_id
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap()
    }

    /// How many local offers this link produced.
    pub fn offers_created(&self) -> usize {
        self.inner.offers_created.load(Ordering::SeqCst)
    }

    /// Remote offers applied to this link, in application order.
    pub fn received_offers(&self) -> Vec<SessionDescription> {
        self.inner.received_offers.lock().unwrap().clone()
    }

    /// Remote answers applied to this link, in application order.
    pub fn received_answers(&self) -> Vec<SessionDescription> {
        self.inner.received_answers.lock().unwrap().clone()
    }

    /// Remote candidates applied to this link, in application order.
    pub fn received_candidates(&self) -> Vec<IceCandidate> {
        self.inner.received_candidates.lock().unwrap().clone()
    }

    /// Whether `close` was called on this link.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Make every subsequent negotiation call on this link fail.
    pub fn set_fail_negotiation(&self, fail: bool) {
        self.inner.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    /// Push a state change into the session, as the engine would.
    pub fn drive_state(&self, state: LinkState) {
        *self.inner.state.lock().unwrap() = state;
        self.inner.send_event(ConnectionEvent::StateChanged(state));
    }

    /// Deliver an inbound remote track, as the engine would.
    pub fn emit_inbound_track(&self) {
        self.inner.emit_inbound_track();
    }
}

// ==================== Engine ====================

#[derive(Default)]
struct MockEngineState {
    hardware_requests: AtomicUsize,
    next_acquire_failure: Mutex<Option<CaptureError>>,
    next_open_failure: Mutex<Option<String>>,
    auto_connect: AtomicBool,
    candidates_per_link: AtomicUsize,
    autoplay_refusals: AtomicUsize,
    sdp_counter: Arc<AtomicUsize>,
    tracks: Mutex<Vec<Arc<MockCaptureTrack>>>,
    links: Mutex<Vec<MockLinkHandle>>,
    sinks: Arc<Mutex<Vec<MockSinkHandle>>>,
}

/// Scriptable in-memory [`MediaEngine`].
///
/// Clone handles share state: hand one clone to the session and keep another
/// for scripting and assertions.
#[derive(Clone)]
pub struct MockEngine {
    state: Arc<MockEngineState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Engine with default scripting: auto-connect on, one candidate per link.
    pub fn new() -> Self {
        let state = MockEngineState {
            auto_connect: AtomicBool::new(true),
            candidates_per_link: AtomicUsize::new(1),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    // ---- scripting ----

    /// Fail the next `acquire_capture` call with the given error.
    pub fn fail_next_acquire(&self, error: CaptureError) {
        *self.state.next_acquire_failure.lock().unwrap() = Some(error);
    }

    /// Fail the next `open_link` call.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        *self.state.next_open_failure.lock().unwrap() = Some(reason.into());
    }

    /// Number of autoplay refusals each new sink starts with.
    pub fn set_autoplay_refusals(&self, refusals: usize) {
        self.state
            .autoplay_refusals
            .store(refusals, Ordering::SeqCst);
    }

    /// Local candidates each link emits after producing a description.
    pub fn set_candidates_per_link(&self, count: usize) {
        self.state
            .candidates_per_link
            .store(count, Ordering::SeqCst);
    }

    /// Whether links emit `Connected` plus an inbound track on their own
    /// once the answer flows. On by default.
    pub fn set_auto_connect(&self, auto: bool) {
        self.state.auto_connect.store(auto, Ordering::SeqCst);
    }

    // ---- inspection ----

    /// Number of fresh hardware acquisitions performed.
    pub fn hardware_requests(&self) -> usize {
        self.state.hardware_requests.load(Ordering::SeqCst)
    }

    /// Every capture track ever handed out, in acquisition order.
    pub fn capture_tracks(&self) -> Vec<Arc<MockCaptureTrack>> {
        self.state.tracks.lock().unwrap().clone()
    }

    /// The most recently acquired capture track.
    pub fn last_track(&self) -> Option<Arc<MockCaptureTrack>> {
        self.state.tracks.lock().unwrap().last().cloned()
    }

    /// Every link ever opened, in open order (closed ones included).
    pub fn links(&self) -> Vec<MockLinkHandle> {
        self.state.links.lock().unwrap().clone()
    }

    /// Links opened toward one transport id, in open order.
    pub fn links_for(&self, transport_id: &TransportId) -> Vec<MockLinkHandle> {
        self.links()
            .into_iter()
            .filter(|l| l.transport_id() == transport_id)
            .collect()
    }

    /// Links not yet closed.
    pub fn open_link_count(&self) -> usize {
        self.links().iter().filter(|l| !l.is_closed()).count()
    }

    /// Every playback sink ever created, in creation order.
    pub fn sinks(&self) -> Vec<MockSinkHandle> {
        self.state.sinks.lock().unwrap().clone()
    }

    /// Sinks created for one peer, in creation order.
    pub fn sinks_for(&self, transport_id: &TransportId) -> Vec<MockSinkHandle> {
        self.sinks()
            .into_iter()
            .filter(|s| s.transport_id() == transport_id)
            .collect()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn acquire_capture(
        &self,
        _constraints: &CaptureConstraints,
    ) -> std::result::Result<Arc<dyn CaptureTrack>, CaptureError> {
        if let Some(error) = self.state.next_acquire_failure.lock().unwrap().take() {
            return Err(error);
        }
        self.state.hardware_requests.fetch_add(1, Ordering::SeqCst);
        let track = MockCaptureTrack::new();
        self.state.tracks.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    async fn open_link(&self, request: LinkRequest) -> Result<Box<dyn PeerLink>> {
        if let Some(reason) = self.state.next_open_failure.lock().unwrap().take() {
            return Err(Error::Engine(reason));
        }
        let inner = Arc::new(MockLinkInner {
            transport_id: request.transport_id,
            state: Mutex::new(LinkState::New),
            offers_created: AtomicUsize::new(0),
            received_offers: Mutex::new(Vec::new()),
            received_answers: Mutex::new(Vec::new()),
            received_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_negotiation: AtomicBool::new(false),
            connect_emitted: AtomicBool::new(false),
            auto_connect: self.state.auto_connect.load(Ordering::SeqCst),
            candidates_per_link: self.state.candidates_per_link.load(Ordering::SeqCst),
            autoplay_refusals: self.state.autoplay_refusals.load(Ordering::SeqCst),
            events: request.events,
            sinks: Arc::clone(&self.state.sinks),
            sdp_counter: Arc::clone(&self.state.sdp_counter),
        });
        self.state.links.lock().unwrap().push(MockLinkHandle {
            inner: Arc::clone(&inner),
        });
        Ok(Box::new(MockLink { inner }))
    }
}
