//! Voice mesh integration harness
//!
//! Simulates the party-game stack around the voice subsystem:
//!
//! - [`RelayHub`]: in-process signaling relay. Routes point-to-point voice
//!   events by `targetTransportId`, broadcasts speaking announcements, and
//!   stamps every delivered frame with the sender's transport id the way
//!   the real relay does.
//! - Room authority: the hub folds `start-speaking` / `stop-speaking` into
//!   a speaking set; [`TestRoom::broadcast_view`] pushes it to every
//!   session inside a roster snapshot. The harness hosts a single room.
//! - [`TestRoom`] / [`TestParticipant`]: one mock engine, host controller,
//!   session handle and event stream per joined participant.
//!
//! Basic usage pattern:
//!
//! 1. Create a [`TestRoom`] and `join` participants
//! 2. Push the roster with `broadcast_view()`
//! 3. Drive mute / visibility / gestures through each participant
//! 4. Assert on [`VoiceEvent`] streams, engine state, and the hub log
//! 5. Call `shutdown()` to tear every session down

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use voicemesh::engine::mock::MockEngine;
use voicemesh::lifecycle::HostController;
use voicemesh::signaling::{
    RelayFrame, RelayTransport, START_SPEAKING, STOP_SPEAKING, VOICE_ANSWER, VOICE_ICE_CANDIDATE,
    VOICE_OFFER,
};
use voicemesh::{
    LocalIdentity, Participant, ParticipantId, Result, RoomId, RoomView, TransportId, VoiceConfig,
    VoiceEvent, VoiceHandle, VoiceSession,
};

/// Frames buffered per client before the hub considers a test stuck.
const SIGNAL_BUFFER: usize = 64;

/// Initialize test logging (call once per test).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,voicemesh=debug")
        .try_init();
}

/// Poll until `condition` holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Relay hub
// ============================================================================

/// One frame as the relay saw it leave a client.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub sender: TransportId,
    pub event: String,
    pub payload: Value,
}

struct HubState {
    clients: HashMap<TransportId, mpsc::Sender<RelayFrame>>,
    speaking: HashSet<ParticipantId>,
    log: Vec<PublishedFrame>,
}

/// In-process signaling relay shared by every session in the room.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<Mutex<HubState>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState {
                clients: HashMap::new(),
                speaking: HashSet::new(),
                log: Vec::new(),
            })),
        }
    }

    /// Register a client; returns its inbound frame stream.
    pub fn register(&self, transport_id: TransportId) -> mpsc::Receiver<RelayFrame> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        self.inner
            .lock()
            .unwrap()
            .clients
            .insert(transport_id, tx);
        rx
    }

    pub fn unregister(&self, transport_id: &TransportId) {
        self.inner.lock().unwrap().clients.remove(transport_id);
    }

    /// The publish side of the relay for one registered client.
    pub fn transport(&self, transport_id: TransportId) -> Arc<HubTransport> {
        Arc::new(HubTransport {
            hub: self.clone(),
            transport_id,
        })
    }

    /// Speaking set the room authority has accumulated.
    pub fn speaking(&self) -> HashSet<ParticipantId> {
        self.inner.lock().unwrap().speaking.clone()
    }

    /// Every frame published through the hub, in order.
    pub fn published(&self) -> Vec<PublishedFrame> {
        self.inner.lock().unwrap().log.clone()
    }

    /// Event names published by one client, in order.
    pub fn events_from(&self, sender: &TransportId) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|f| f.sender == *sender)
            .map(|f| f.event.clone())
            .collect()
    }

    /// Frames for one event name (any prefix), in order.
    pub fn frames_for(&self, base: &str) -> Vec<PublishedFrame> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|f| has_suffix(&f.event, base))
            .cloned()
            .collect()
    }

    /// Inject a raw frame to one client, bypassing routing. For stray and
    /// late-message fault tests.
    pub fn deliver(&self, target: &TransportId, frame: RelayFrame) {
        let state = self.inner.lock().unwrap();
        if let Some(tx) = state.clients.get(target) {
            if let Err(e) = tx.try_send(frame) {
                panic!("injected delivery to {} failed: {}", target, e);
            }
        }
    }

    fn route(&self, sender: TransportId, event: &str, payload: Value) {
        let mut state = self.inner.lock().unwrap();
        state.log.push(PublishedFrame {
            sender: sender.clone(),
            event: event.to_string(),
            payload: payload.clone(),
        });

        if has_suffix(event, VOICE_OFFER)
            || has_suffix(event, VOICE_ANSWER)
            || has_suffix(event, VOICE_ICE_CANDIDATE)
        {
            let Some(target) = payload["targetTransportId"].as_str() else {
                panic!("point-to-point event {} without targetTransportId", event);
            };
            deliver_frame(
                &state.clients,
                &TransportId::new(target),
                RelayFrame {
                    event: event.to_string(),
                    sender: Some(sender),
                    payload,
                },
            );
            return;
        }

        if has_suffix(event, START_SPEAKING) || has_suffix(event, STOP_SPEAKING) {
            if let Some(participant) = payload["participantId"].as_str() {
                let id = ParticipantId::new(participant);
                if has_suffix(event, START_SPEAKING) {
                    state.speaking.insert(id);
                } else {
                    state.speaking.remove(&id);
                }
            }
            // Broadcast-intent: everyone but the sender sees it.
            let frame = RelayFrame {
                event: event.to_string(),
                sender: Some(sender.clone()),
                payload,
            };
            let others: Vec<TransportId> = state
                .clients
                .keys()
                .filter(|t| **t != sender)
                .cloned()
                .collect();
            for target in others {
                deliver_frame(&state.clients, &target, frame.clone());
            }
            return;
        }

        debug!(event, "hub dropping unrecognized event");
    }
}

fn has_suffix(event: &str, base: &str) -> bool {
    event == base || event.ends_with(&format!(":{}", base))
}

fn deliver_frame(
    clients: &HashMap<TransportId, mpsc::Sender<RelayFrame>>,
    target: &TransportId,
    frame: RelayFrame,
) {
    let Some(tx) = clients.get(target) else {
        debug!(%target, "hub dropping frame for unregistered client");
        return;
    };
    match tx.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            panic!("signal buffer full for {}", target);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(%target, "hub dropping frame for departed client");
        }
    }
}

/// Per-client publish endpoint backed by the hub.
pub struct HubTransport {
    hub: RelayHub,
    transport_id: TransportId,
}

#[async_trait]
impl RelayTransport for HubTransport {
    async fn publish(&self, event: &str, payload: Value) -> Result<()> {
        self.hub.route(self.transport_id.clone(), event, payload);
        Ok(())
    }
}

// ============================================================================
// Room and participants
// ============================================================================

/// One joined participant: identity, engine, host feeds, session handle.
pub struct TestParticipant {
    pub identity: LocalIdentity,
    pub display_name: String,
    pub engine: MockEngine,
    pub host: HostController,
    pub handle: VoiceHandle,
    pub events: mpsc::Receiver<VoiceEvent>,
}

impl TestParticipant {
    pub fn transport_id(&self) -> &TransportId {
        &self.identity.transport_id
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.identity.participant_id
    }

    /// Next event, or panic after two seconds.
    pub async fn next_event(&mut self) -> VoiceEvent {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for a voice event")
            .expect("event channel closed")
    }

    /// Wait for an event matching `pred`, discarding everything before it.
    pub async fn expect_event(
        &mut self,
        pred: impl Fn(&VoiceEvent) -> bool,
        what: &str,
    ) -> VoiceEvent {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, self.events.recv()).await {
                Ok(Some(event)) if pred(&event) => return event,
                Ok(Some(event)) => debug!(?event, "skipping while waiting for {}", what),
                Ok(None) => panic!("event channel closed while waiting for {}", what),
                Err(_) => panic!("timed out waiting for {}", what),
            }
        }
    }
}

/// A room full of live voice sessions wired through one [`RelayHub`].
pub struct TestRoom {
    room_id: RoomId,
    hub: RelayHub,
    participants: Vec<TestParticipant>,
}

impl TestRoom {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: RoomId::new(room_id),
            hub: RelayHub::new(),
            participants: Vec::new(),
        }
    }

    pub fn hub(&self) -> &RelayHub {
        &self.hub
    }

    /// Join with the default config. `name` becomes `p-{name}` / `t-{name}`.
    pub fn join(&mut self, name: &str) -> Result<()> {
        self.join_with(name, VoiceConfig::default())
    }

    pub fn join_with(&mut self, name: &str, config: VoiceConfig) -> Result<()> {
        let identity = LocalIdentity::new(
            self.room_id.clone(),
            format!("p-{}", name),
            format!("t-{}", name),
        );
        let engine = MockEngine::new();
        let (host, hooks) = HostController::new();
        let signals = self.hub.register(identity.transport_id.clone());
        let transport = self.hub.transport(identity.transport_id.clone());

        let (handle, events) = VoiceSession::spawn(
            config,
            identity.clone(),
            Arc::new(engine.clone()),
            transport,
            signals,
            hooks,
        )?;

        self.participants.push(TestParticipant {
            identity,
            display_name: name.to_string(),
            engine,
            host,
            handle,
            events,
        });
        Ok(())
    }

    /// Roster snapshot of everyone currently joined, with the authority's
    /// speaking set folded in.
    pub fn view(&self) -> RoomView {
        RoomView::new(self.room_id.clone())
            .with_participants(
                self.participants
                    .iter()
                    .map(|p| {
                        Participant::new(
                            p.identity.participant_id.clone(),
                            p.identity.transport_id.clone(),
                            p.display_name.clone(),
                        )
                    })
                    .collect(),
            )
            .with_speaking(self.hub.speaking())
    }

    /// Push the current snapshot to every session, like the authority does
    /// after each membership or speaking change.
    pub async fn broadcast_view(&self) -> Result<()> {
        let view = self.view();
        for p in &self.participants {
            p.handle.room_update(view.clone()).await?;
        }
        Ok(())
    }

    pub fn participant(&mut self, name: &str) -> &mut TestParticipant {
        let transport_id = TransportId::new(format!("t-{}", name));
        self.participants
            .iter_mut()
            .find(|p| p.identity.transport_id == transport_id)
            .expect("unknown participant")
    }

    /// Shut one participant down, drop it from the room, and push the
    /// shrunken roster to everyone left.
    pub async fn leave(&mut self, name: &str) -> Result<()> {
        let transport_id = TransportId::new(format!("t-{}", name));
        let idx = self
            .participants
            .iter()
            .position(|p| p.identity.transport_id == transport_id)
            .expect("unknown participant");
        let participant = self.participants.remove(idx);
        self.hub.unregister(&participant.identity.transport_id);
        participant.handle.shutdown().await?;
        self.broadcast_view().await
    }

    /// Tear every session down.
    pub async fn shutdown(mut self) {
        for p in self.participants.drain(..) {
            let _ = p.handle.shutdown().await;
        }
    }
}
