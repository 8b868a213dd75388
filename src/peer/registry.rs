//! Peer connection registry
//!
//! One link per remote transport id, full stop. The registry owns every
//! link's negotiation phase, queues remote candidates until the remote
//! description lands, ignores duplicate offers and answers, and resolves
//! simultaneous offers (glare) deterministically: the lexicographically
//! smaller transport id keeps its offerer role, the larger abandons its
//! own offer and answers instead.

use crate::engine::{
    CaptureTrack, IceCandidate, LinkRequest, LinkState, MediaEngine, PeerEvent, PeerLink,
    SessionDescription,
};
use crate::room::TransportId;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationPhase {
    /// We offered and are waiting for the answer.
    OfferSent,
    /// The remote description has been applied (we answered their offer,
    /// or their answer landed on ours).
    Answered,
    /// The link reported connected.
    Connected,
}

struct PeerEntry {
    link: Box<dyn PeerLink>,
    phase: NegotiationPhase,
    /// Candidates received before the remote description; applied in
    /// arrival order once it lands.
    pending_candidates: Vec<IceCandidate>,
    remote_applied: bool,
}

/// What a link state report means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDisposition {
    /// No transition worth reporting.
    Unchanged,
    /// First time this link reached connected.
    BecameConnected,
    /// The link ended and was evicted from the registry.
    Evicted { was_connected: bool },
}

/// All peer links for one session, keyed by remote transport id.
///
/// Owns negotiation state per peer, including glare resolution and the
/// pre-description candidate queue.
pub struct PeerRegistry {
    engine: Arc<dyn MediaEngine>,
    local_transport: TransportId,
    events_tx: mpsc::Sender<PeerEvent>,
    entries: HashMap<TransportId, PeerEntry>,
}

impl PeerRegistry {
    /// Empty registry bound to one engine and one local transport id.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        local_transport: TransportId,
        events_tx: mpsc::Sender<PeerEvent>,
    ) -> Self {
        Self {
            engine,
            local_transport,
            events_tx,
            entries: HashMap::new(),
        }
    }

    async fn open_link(
        &self,
        remote: &TransportId,
        local_track: Arc<dyn CaptureTrack>,
    ) -> Result<Box<dyn PeerLink>> {
        self.engine
            .open_link(LinkRequest {
                transport_id: remote.clone(),
                local_track,
                events: self.events_tx.clone(),
            })
            .await
    }

    /// Open a link toward `remote` and create an offer for it.
    ///
    /// Returns `None` when a link for that transport already exists, in
    /// whatever phase: one connection per peer.
    pub async fn offer_to(
        &mut self,
        remote: &TransportId,
        local_track: Arc<dyn CaptureTrack>,
    ) -> Result<Option<SessionDescription>> {
        if *remote == self.local_transport {
            return Ok(None);
        }
        if self.entries.contains_key(remote) {
            debug!(%remote, "link already exists, not offering");
            return Ok(None);
        }

        let link = self.open_link(remote, local_track).await?;
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };
        self.entries.insert(
            remote.clone(),
            PeerEntry {
                link,
                phase: NegotiationPhase::OfferSent,
                pending_candidates: Vec::new(),
                remote_applied: false,
            },
        );
        info!(%remote, "offer created");
        Ok(Some(offer))
    }

    /// Handle an inbound offer from `remote`, producing the answer to
    /// publish.
    ///
    /// Returns `None` when the offer must not be answered: a duplicate for
    /// an already-negotiated link, or glare where this side's smaller
    /// transport id keeps the offerer role.
    pub async fn accept_offer(
        &mut self,
        remote: &TransportId,
        offer: &SessionDescription,
        local_track: Arc<dyn CaptureTrack>,
    ) -> Result<Option<SessionDescription>> {
        match self.entries.get(remote).map(|e| e.phase) {
            Some(NegotiationPhase::OfferSent) => {
                if self.local_transport < *remote {
                    debug!(%remote, "glare: keeping own offer, ignoring theirs");
                    return Ok(None);
                }
                // Larger id yields: drop our offer and answer theirs.
                if let Some(entry) = self.entries.remove(remote) {
                    entry.link.close().await;
                }
                info!(%remote, "glare: abandoning own offer, answering theirs");
            }
            Some(NegotiationPhase::Answered) | Some(NegotiationPhase::Connected) => {
                debug!(%remote, "duplicate offer ignored");
                return Ok(None);
            }
            None => {}
        }

        let link = self.open_link(remote, local_track).await?;
        let answer = match link.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };
        self.entries.insert(
            remote.clone(),
            PeerEntry {
                link,
                phase: NegotiationPhase::Answered,
                pending_candidates: Vec::new(),
                remote_applied: true,
            },
        );
        info!(%remote, "answered inbound offer");
        Ok(Some(answer))
    }

    /// Apply the answer to an offer we sent. A late answer for a link that
    /// no longer exists, or a duplicate, is ignored.
    pub async fn apply_answer(
        &mut self,
        remote: &TransportId,
        answer: &SessionDescription,
    ) -> Result<()> {
        let Some(entry) = self.entries.get_mut(remote) else {
            warn!(%remote, "answer for unknown link ignored");
            return Ok(());
        };
        if entry.phase != NegotiationPhase::OfferSent {
            debug!(%remote, "duplicate answer ignored");
            return Ok(());
        }

        entry.link.apply_answer(answer).await?;
        entry.phase = NegotiationPhase::Answered;
        entry.remote_applied = true;

        let pending = std::mem::take(&mut entry.pending_candidates);
        for candidate in pending {
            if let Err(e) = entry.link.add_remote_candidate(&candidate).await {
                warn!(%remote, error = %e, "dropping queued candidate");
            }
        }
        info!(%remote, "answer applied");
        Ok(())
    }

    /// Apply a remote candidate, queueing it while the remote description
    /// has not landed yet. Candidates for unknown links are dropped.
    pub async fn add_remote_candidate(
        &mut self,
        remote: &TransportId,
        candidate: &IceCandidate,
    ) -> Result<()> {
        let Some(entry) = self.entries.get_mut(remote) else {
            debug!(%remote, "candidate for unknown link dropped");
            return Ok(());
        };
        if !entry.remote_applied {
            debug!(%remote, "queueing candidate until remote description");
            entry.pending_candidates.push(candidate.clone());
            return Ok(());
        }
        entry.link.add_remote_candidate(candidate).await
    }

    /// Fold a link state report into the registry. Failed or closed links
    /// are closed and evicted.
    pub async fn note_link_state(
        &mut self,
        remote: &TransportId,
        state: LinkState,
    ) -> LinkDisposition {
        let Some(phase) = self.entries.get(remote).map(|e| e.phase) else {
            return LinkDisposition::Unchanged;
        };
        match state {
            LinkState::Connected => {
                if phase == NegotiationPhase::Connected {
                    return LinkDisposition::Unchanged;
                }
                if let Some(entry) = self.entries.get_mut(remote) {
                    entry.phase = NegotiationPhase::Connected;
                }
                info!(%remote, "peer link connected");
                LinkDisposition::BecameConnected
            }
            LinkState::Failed | LinkState::Closed => {
                if let Some(entry) = self.entries.remove(remote) {
                    entry.link.close().await;
                }
                warn!(%remote, ?state, "peer link ended, evicted");
                LinkDisposition::Evicted {
                    was_connected: phase == NegotiationPhase::Connected,
                }
            }
            LinkState::New | LinkState::Negotiating => LinkDisposition::Unchanged,
        }
    }

    /// Close links to transports no longer in the room. Returns the
    /// evicted transports, each with whether it had been connected.
    pub async fn prune_absent(
        &mut self,
        present: &HashSet<TransportId>,
    ) -> Vec<(TransportId, bool)> {
        let mut absent: Vec<TransportId> = self
            .entries
            .keys()
            .filter(|t| !present.contains(*t))
            .cloned()
            .collect();
        absent.sort();
        let mut evicted = Vec::new();
        for remote in absent {
            if let Some(entry) = self.entries.remove(&remote) {
                let was_connected = entry.phase == NegotiationPhase::Connected;
                entry.link.close().await;
                info!(%remote, "closed link to departed transport");
                evicted.push((remote, was_connected));
            }
        }
        evicted
    }

    pub async fn close_peer(&mut self, remote: &TransportId) -> bool {
        match self.entries.remove(remote) {
            Some(entry) => {
                entry.link.close().await;
                info!(%remote, "peer link closed");
                true
            }
            None => false,
        }
    }

    /// Close every link concurrently. Returns how many were open.
    pub async fn close_all(&mut self) -> usize {
        let entries: Vec<PeerEntry> = self.entries.drain().map(|(_, e)| e).collect();
        let count = entries.len();
        if count > 0 {
            futures::future::join_all(entries.iter().map(|e| e.link.close())).await;
            info!(count, "closed all peer links");
        }
        count
    }

    /// Whether a link to this peer exists in any phase.
    pub fn contains(&self, remote: &TransportId) -> bool {
        self.entries.contains_key(remote)
    }

    /// Whether the link to this peer has reached connected.
    pub fn is_connected(&self, remote: &TransportId) -> bool {
        self.entries
            .get(remote)
            .is_some_and(|e| e.phase == NegotiationPhase::Connected)
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no peers are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transport ids with live entries, sorted for stable iteration.
    pub fn transport_ids(&self) -> Vec<TransportId> {
        let mut ids: Vec<TransportId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Transport ids whose links reported connected, sorted.
    pub fn connected_transports(&self) -> Vec<TransportId> {
        let mut ids: Vec<TransportId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.phase == NegotiationPhase::Connected)
            .map(|(t, _)| t.clone())
            .collect();
        ids.sort();
        ids
    }
}
