//! The voice session task
//!
//! One spawned task per joined room owns every piece of voice state:
//! capture, the peer registry, playback, speaking set, lifecycle. All
//! inputs — host commands, relay frames, engine events, visibility,
//! gestures — funnel into a single `select!` loop, so state transitions
//! are totally ordered and nothing in here needs a lock.
//!
//! The host talks to the task through [`VoiceHandle`] and listens on the
//! [`VoiceEvent`] stream returned by [`VoiceSession::spawn`].

use crate::capture::CaptureManager;
use crate::config::{MutePolicy, VoiceConfig};
use crate::engine::{ConnectionEvent, MediaEngine, PeerEvent, SessionDescription};
use crate::error::CaptureError;
use crate::lifecycle::{GestureArm, HostHooks, LifecycleAction, LifecycleCoordinator, Visibility};
use crate::peer::{AttachOutcome, LinkDisposition, PeerRegistry, PlaybackRouter};
use crate::room::{LocalIdentity, ParticipantId, RoomView, TransportId};
use crate::signaling::{
    AnswerPayload, CandidatePayload, OfferPayload, RelayAdapter, RelayFrame, RelaySignal,
    RelayTransport, SpeakingPayload,
};
use crate::speaking::SpeakingTracker;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands from the host to the session task.
#[derive(Debug)]
enum Command {
    SetMuted(bool),
    RoomUpdate(RoomView),
    Teardown,
}

/// What the session reports back to the UI layer.
#[derive(Debug)]
pub enum VoiceEvent {
    /// The effective mute state changed (by command or by lifecycle).
    MuteChanged { muted: bool },
    /// Microphone acquisition failed. `message` is ready to show the user.
    CaptureFailed {
        error: CaptureError,
        message: String,
    },
    /// A peer link reached connected.
    PeerConnected { transport_id: TransportId },
    /// A previously connected peer is gone.
    PeerDisconnected { transport_id: TransportId },
    /// The set of speaking participants (other than the local one) changed.
    SpeakingChanged { speaking: Vec<ParticipantId> },
    /// A remote track's audio could not start; it will retry on the next
    /// user gesture.
    PlaybackBlocked { transport_id: TransportId },
    /// Parked audio resumed after a gesture.
    PlaybackResumed { transport_ids: Vec<TransportId> },
    /// The session tore down and the task is about to end.
    Stopped,
}

/// Handle to a running voice session.
///
/// Dropping the handle tears the session down, best effort; call
/// [`shutdown`](VoiceHandle::shutdown) to tear down and wait for it.
pub struct VoiceHandle {
    commands: mpsc::Sender<Command>,
    task: Option<JoinHandle<()>>,
}

impl VoiceHandle {
    /// Set the mute state. Redundant toggles are deduplicated by the
    /// session; toggles are applied in send order.
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.commands
            .send(Command::SetMuted(muted))
            .await
            .map_err(|_| Error::ChannelClosed("voice session is gone".to_string()))
    }

    /// Stop transmitting.
    pub async fn mute(&self) -> Result<()> {
        self.set_muted(true).await
    }

    /// Start transmitting, acquiring the microphone if needed.
    pub async fn unmute(&self) -> Result<()> {
        self.set_muted(false).await
    }

    /// Push the latest room snapshot (participants and speaking set).
    pub async fn room_update(&self, view: RoomView) -> Result<()> {
        self.commands
            .send(Command::RoomUpdate(view))
            .await
            .map_err(|_| Error::ChannelClosed("voice session is gone".to_string()))
    }

    /// Tear down and wait for the task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.commands.send(Command::Teardown).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Other(anyhow::anyhow!("voice session task panicked: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for VoiceHandle {
    fn drop(&mut self) {
        let _ = self.commands.try_send(Command::Teardown);
    }
}

/// State owned by the session task. Constructed and consumed by
/// [`VoiceSession::spawn`].
pub struct VoiceSession {
    config: VoiceConfig,
    identity: LocalIdentity,
    relay: RelayAdapter,
    capture: CaptureManager,
    registry: PeerRegistry,
    playback: PlaybackRouter,
    speaking: SpeakingTracker,
    lifecycle: LifecycleCoordinator,
    roster: Option<RoomView>,
    muted: bool,
    events: mpsc::Sender<VoiceEvent>,
}

impl VoiceSession {
    /// Validate the config and spawn the session task.
    ///
    /// `signals` is the stream of raw frames from the room relay (see
    /// [`RelayFrame`]); `hooks` carries the host's visibility and gesture
    /// feeds. The session starts muted regardless of policy.
    pub fn spawn(
        config: VoiceConfig,
        identity: LocalIdentity,
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn RelayTransport>,
        signals: mpsc::Receiver<RelayFrame>,
        hooks: HostHooks,
    ) -> Result<(VoiceHandle, mpsc::Receiver<VoiceEvent>)> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let (peer_events_tx, peer_events_rx) = mpsc::channel(config.signal_buffer);

        let relay = RelayAdapter::new(transport, config.event_prefix.clone());
        let capture = CaptureManager::new(Arc::clone(&engine), config.capture.clone());
        let registry = PeerRegistry::new(engine, identity.transport_id.clone(), peer_events_tx);
        let speaking = SpeakingTracker::new(identity.participant_id.clone());

        let session = VoiceSession {
            config,
            identity,
            relay,
            capture,
            registry,
            playback: PlaybackRouter::new(),
            speaking,
            lifecycle: LifecycleCoordinator::new(),
            roster: None,
            muted: true,
            events: events_tx,
        };
        let task = tokio::spawn(session.run(commands_rx, signals, peer_events_rx, hooks));
        Ok((
            VoiceHandle {
                commands: commands_tx,
                task: Some(task),
            },
            events_rx,
        ))
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::Receiver<RelayFrame>,
        mut peer_events: mpsc::Receiver<PeerEvent>,
        hooks: HostHooks,
    ) {
        let mut visibility = hooks.visibility;
        let mut visibility_alive = true;
        let mut gesture = GestureArm::new(hooks.gestures);
        info!(room = %self.identity.room_id, transport = %self.identity.transport_id, "voice session started");

        loop {
            tokio::select! {
                biased;

                maybe_cmd = commands.recv() => match maybe_cmd {
                    Some(Command::SetMuted(muted)) => self.set_muted(muted).await,
                    Some(Command::RoomUpdate(view)) => self.room_update(view).await,
                    Some(Command::Teardown) | None => {
                        self.teardown().await;
                        break;
                    }
                },

                Some(event) = peer_events.recv() => {
                    self.peer_event(event, &mut gesture).await;
                }

                Some(frame) = signals.recv() => {
                    self.inbound_frame(frame).await;
                }

                changed = visibility.changed(), if visibility_alive => match changed {
                    Ok(()) => {
                        let now = *visibility.borrow();
                        self.visibility_change(now).await;
                    }
                    Err(_) => {
                        debug!("host visibility feed closed");
                        visibility_alive = false;
                    }
                },

                fired = gesture.fired(), if gesture.is_armed() => {
                    if fired {
                        self.gesture(&mut gesture).await;
                    }
                }
            }
        }
        info!("voice session ended");
    }

    // ==================== Mute ====================

    async fn set_muted(&mut self, muted: bool) {
        if muted == self.muted {
            debug!(muted, "mute state unchanged");
            return;
        }
        if muted {
            self.mute().await;
        } else {
            self.unmute().await;
        }
    }

    async fn unmute(&mut self) {
        let track = match self.capture.acquire().await {
            Ok(track) => track,
            Err(error) => {
                warn!(error = %error, "microphone acquisition failed");
                self.emit(VoiceEvent::CaptureFailed {
                    message: error.user_message().to_string(),
                    error,
                })
                .await;
                return;
            }
        };
        track.set_enabled(true);
        self.muted = false;
        self.emit(VoiceEvent::MuteChanged { muted: false }).await;
        self.publish_speaking(true).await;
        self.offer_to_roster().await;
    }

    async fn mute(&mut self) {
        self.capture.set_enabled(false);
        self.muted = true;
        self.emit(VoiceEvent::MuteChanged { muted: true }).await;
        self.publish_speaking(false).await;

        if self.config.mute_policy == MutePolicy::ToggleBound {
            let connected = self.registry.connected_transports();
            self.registry.close_all().await;
            self.playback.clear();
            for transport_id in connected {
                self.emit(VoiceEvent::PeerDisconnected { transport_id }).await;
            }
        }
    }

    // ==================== Room snapshots ====================

    async fn room_update(&mut self, view: RoomView) {
        if view.room_id != self.identity.room_id {
            warn!(got = %view.room_id, "room snapshot for a different room ignored");
            return;
        }

        if self.speaking.apply(view.speaking.clone()) {
            self.emit(VoiceEvent::SpeakingChanged {
                speaking: self.speaking.others(),
            })
            .await;
        }

        let present = view.transport_ids();
        for (transport_id, was_connected) in self.registry.prune_absent(&present).await {
            self.playback.remove(&transport_id);
            if was_connected {
                self.emit(VoiceEvent::PeerDisconnected { transport_id }).await;
            }
        }

        self.roster = Some(view);
        if !self.muted {
            self.offer_to_roster().await;
        }
    }

    // ==================== Relay signals ====================

    async fn inbound_frame(&mut self, frame: RelayFrame) {
        let Some(inbound) = self.relay.classify(&frame) else {
            return;
        };
        let Some(sender) = inbound.sender else {
            warn!(event = %frame.event, "signal without a sender dropped");
            return;
        };
        if sender == self.identity.transport_id {
            return;
        }
        match inbound.signal {
            RelaySignal::Offer(payload) => self.inbound_offer(sender, payload).await,
            RelaySignal::Answer(payload) => self.inbound_answer(sender, payload).await,
            RelaySignal::Candidate(payload) => self.inbound_candidate(sender, payload).await,
            RelaySignal::StartSpeaking(payload) | RelaySignal::StopSpeaking(payload) => {
                // The room authority folds announcements into the snapshot
                // we get via room_update; raw ones are informational here.
                debug!(participant = %payload.participant_id, "peer speaking announcement");
            }
        }
    }

    fn addressed_to_me(&self, target: &TransportId) -> bool {
        *target == self.identity.transport_id
    }

    async fn inbound_offer(&mut self, sender: TransportId, payload: OfferPayload) {
        if !self.addressed_to_me(&payload.target_transport_id) {
            return;
        }
        if payload.room_id != self.identity.room_id {
            warn!(%sender, "offer for a different room ignored");
            return;
        }
        // Our track rides the answer, so capture must exist first; it stays
        // disabled unless we are already unmuted.
        let track = match self.capture.acquire().await {
            Ok(track) => track,
            Err(error) => {
                warn!(%sender, error = %error, "cannot answer an offer without capture");
                self.emit(VoiceEvent::CaptureFailed {
                    message: error.user_message().to_string(),
                    error,
                })
                .await;
                return;
            }
        };
        track.set_enabled(!self.muted);

        match self.registry.accept_offer(&sender, &payload.offer, track).await {
            Ok(Some(answer)) => self.publish_answer(sender, answer).await,
            Ok(None) => {}
            Err(e) => warn!(%sender, error = %e, "failed to answer offer"),
        }
    }

    async fn inbound_answer(&mut self, sender: TransportId, payload: AnswerPayload) {
        if !self.addressed_to_me(&payload.target_transport_id) {
            return;
        }
        if payload.room_id != self.identity.room_id {
            warn!(%sender, "answer for a different room ignored");
            return;
        }
        if let Err(e) = self.registry.apply_answer(&sender, &payload.answer).await {
            warn!(%sender, error = %e, "failed to apply answer");
        }
    }

    async fn inbound_candidate(&mut self, sender: TransportId, payload: CandidatePayload) {
        if !self.addressed_to_me(&payload.target_transport_id) {
            return;
        }
        if let Err(e) = self
            .registry
            .add_remote_candidate(&sender, &payload.candidate)
            .await
        {
            warn!(%sender, error = %e, "failed to apply candidate");
        }
    }

    // ==================== Engine events ====================

    async fn peer_event(&mut self, event: PeerEvent, gesture: &mut GestureArm) {
        let PeerEvent {
            transport_id,
            event,
        } = event;
        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                if !self.registry.contains(&transport_id) {
                    debug!(%transport_id, "candidate for an evicted link dropped");
                    return;
                }
                let signal = RelaySignal::Candidate(CandidatePayload {
                    room_id: self.identity.room_id.clone(),
                    candidate,
                    target_transport_id: transport_id.clone(),
                });
                if let Err(e) = self.relay.publish(&signal).await {
                    warn!(%transport_id, error = %e, "failed to publish candidate");
                }
            }
            ConnectionEvent::InboundTrack(sink) => {
                if !self.registry.contains(&transport_id) {
                    debug!(%transport_id, "inbound track for an evicted link dropped");
                    return;
                }
                match self.playback.attach(transport_id.clone(), sink) {
                    AttachOutcome::Playing => {}
                    AttachOutcome::Blocked => {
                        gesture.arm();
                        self.emit(VoiceEvent::PlaybackBlocked { transport_id }).await;
                    }
                }
            }
            ConnectionEvent::StateChanged(state) => {
                match self.registry.note_link_state(&transport_id, state).await {
                    LinkDisposition::BecameConnected => {
                        self.emit(VoiceEvent::PeerConnected { transport_id }).await;
                    }
                    LinkDisposition::Evicted { was_connected } => {
                        self.playback.remove(&transport_id);
                        if was_connected {
                            self.emit(VoiceEvent::PeerDisconnected { transport_id }).await;
                        }
                    }
                    LinkDisposition::Unchanged => {}
                }
            }
        }
    }

    // ==================== Lifecycle ====================

    async fn visibility_change(&mut self, visibility: Visibility) {
        let engaged = self.capture.has_live_track();
        match self.lifecycle.observe(visibility, engaged) {
            Some(LifecycleAction::ReleaseAndClose) => {
                info!("app hidden: releasing microphone, closing links");
                self.capture.release();
                let connected = self.registry.connected_transports();
                self.registry.close_all().await;
                self.playback.clear();
                for transport_id in connected {
                    self.emit(VoiceEvent::PeerDisconnected { transport_id }).await;
                }
                if !self.muted {
                    self.muted = true;
                    self.emit(VoiceEvent::MuteChanged { muted: true }).await;
                    self.publish_speaking(false).await;
                }
            }
            Some(LifecycleAction::ReacquireMuted) => {
                info!("app visible: re-acquiring microphone muted");
                match self.capture.acquire().await {
                    Ok(track) => track.set_enabled(false),
                    Err(error) => {
                        warn!(error = %error, "microphone re-acquisition failed");
                        self.emit(VoiceEvent::CaptureFailed {
                            message: error.user_message().to_string(),
                            error,
                        })
                        .await;
                    }
                }
            }
            None => {}
        }
    }

    async fn gesture(&mut self, gesture: &mut GestureArm) {
        let resumed = self.playback.retry_blocked();
        if !resumed.is_empty() {
            self.emit(VoiceEvent::PlaybackResumed {
                transport_ids: resumed,
            })
            .await;
        }
        if self.playback.has_blocked() {
            gesture.arm();
        }
    }

    async fn teardown(&mut self) {
        info!("voice session teardown");
        if !self.muted {
            self.publish_speaking(false).await;
        }
        self.capture.release();
        self.registry.close_all().await;
        self.playback.clear();
        self.emit(VoiceEvent::Stopped).await;
    }

    // ==================== Outbound ====================

    async fn offer_to_roster(&mut self) {
        let Some(track) = self.capture.track() else {
            return;
        };
        let peers: Vec<TransportId> = match &self.roster {
            Some(view) => view.peer_transports(&self.identity.transport_id),
            None => return,
        };
        for remote in peers {
            match self.registry.offer_to(&remote, Arc::clone(&track)).await {
                Ok(Some(offer)) => self.publish_offer(remote, offer).await,
                Ok(None) => {}
                Err(e) => warn!(%remote, error = %e, "offer to peer failed"),
            }
        }
    }

    async fn publish_offer(&self, remote: TransportId, offer: SessionDescription) {
        let signal = RelaySignal::Offer(OfferPayload {
            room_id: self.identity.room_id.clone(),
            offer,
            target_transport_id: remote.clone(),
        });
        if let Err(e) = self.relay.publish(&signal).await {
            warn!(%remote, error = %e, "failed to publish offer");
        }
    }

    async fn publish_answer(&self, remote: TransportId, answer: SessionDescription) {
        let signal = RelaySignal::Answer(AnswerPayload {
            room_id: self.identity.room_id.clone(),
            answer,
            target_transport_id: remote.clone(),
        });
        if let Err(e) = self.relay.publish(&signal).await {
            warn!(%remote, error = %e, "failed to publish answer");
        }
    }

    async fn publish_speaking(&self, live: bool) {
        let payload = SpeakingPayload {
            room_id: self.identity.room_id.clone(),
            participant_id: self.identity.participant_id.clone(),
        };
        let signal = if live {
            RelaySignal::StartSpeaking(payload)
        } else {
            RelaySignal::StopSpeaking(payload)
        };
        if let Err(e) = self.relay.publish(&signal).await {
            warn!(error = %e, "failed to publish speaking state");
        }
    }

    async fn emit(&self, event: VoiceEvent) {
        if self.events.send(event).await.is_err() {
            debug!("voice event receiver dropped");
        }
    }
}
