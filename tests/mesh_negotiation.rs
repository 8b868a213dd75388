//! Mesh establishment over the in-memory relay hub
//!
//! Two-sided negotiation: offers on unmute, muted-capture answers, glare
//! convergence, the one-link-per-peer invariant, and tolerance of late or
//! stray relay deliveries.

mod harness;

use harness::{wait_until, TestRoom};
use voicemesh::engine::CaptureTrack;
use voicemesh::{TransportId, VoiceEvent};

#[tokio::test]
async fn test_unmute_builds_a_two_party_mesh() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    room.join("alice").unwrap();
    room.join("bob").unwrap();
    room.broadcast_view().await.unwrap();

    // Alice unmutes; Bob has never touched his microphone.
    room.participant("alice").handle.unmute().await.unwrap();

    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { transport_id } if *transport_id == TransportId::new("t-bob")),
            "alice connected to bob",
        )
        .await;
    room.participant("bob")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { transport_id } if *transport_id == TransportId::new("t-alice")),
            "bob connected to alice",
        )
        .await;

    // Exactly one link per side.
    let alice = room.participant("alice");
    assert_eq!(alice.engine.links().len(), 1);
    assert_eq!(alice.engine.links()[0].offers_created(), 1);
    assert!(alice.engine.last_track().unwrap().is_enabled());

    // Bob acquired capture to answer, but stays muted.
    let bob = room.participant("bob");
    assert_eq!(bob.engine.links().len(), 1);
    assert_eq!(bob.engine.hardware_requests(), 1);
    assert!(!bob.engine.last_track().unwrap().is_enabled());

    // One offer, one answer on the wire.
    assert_eq!(room.hub().frames_for("voice-offer").len(), 1);
    assert_eq!(room.hub().frames_for("voice-answer").len(), 1);

    room.shutdown().await;
}

#[tokio::test]
async fn test_candidates_trickle_both_ways() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    room.join("alice").unwrap();
    room.join("bob").unwrap();
    for name in ["alice", "bob"] {
        room.participant(name).engine.set_candidates_per_link(2);
    }
    room.broadcast_view().await.unwrap();

    room.participant("alice").handle.unmute().await.unwrap();
    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "alice connected",
        )
        .await;
    room.participant("bob")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "bob connected",
        )
        .await;

    // Both sides applied the other's two candidates, queued or direct.
    let alice_link = room.participant("alice").engine.links()[0].clone();
    let bob_link = room.participant("bob").engine.links()[0].clone();
    wait_until(
        || alice_link.received_candidates().len() == 2 && bob_link.received_candidates().len() == 2,
        "candidates applied on both links",
    )
    .await;
    assert_eq!(room.hub().frames_for("voice-ice-candidate").len(), 4);

    room.shutdown().await;
}

#[tokio::test]
async fn test_three_party_mesh_is_pairwise_complete() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    for name in ["alice", "bob", "carol"] {
        room.join(name).unwrap();
    }
    room.broadcast_view().await.unwrap();

    room.participant("alice").handle.unmute().await.unwrap();
    for _ in 0..2 {
        room.participant("alice")
            .expect_event(
                |e| matches!(e, VoiceEvent::PeerConnected { .. }),
                "alice's two links",
            )
            .await;
    }

    // Bob unmutes next: his link to alice already exists, only carol is new.
    room.participant("bob").handle.unmute().await.unwrap();
    room.participant("bob")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { transport_id } if *transport_id == TransportId::new("t-carol")),
            "bob connected to carol",
        )
        .await;

    for name in ["alice", "bob", "carol"] {
        let participant = room.participant(name);
        assert_eq!(
            participant.engine.open_link_count(),
            2,
            "{} should hold one link per peer",
            name
        );
    }
    // alice->bob, alice->carol, bob->carol: three offers total.
    assert_eq!(room.hub().frames_for("voice-offer").len(), 3);

    room.shutdown().await;
}

#[tokio::test]
async fn test_simultaneous_offers_converge_on_one_link() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    room.join("alice").unwrap();
    room.join("bob").unwrap();
    room.broadcast_view().await.unwrap();

    // Both sides offer before either has seen the other's offer.
    room.participant("alice").handle.unmute().await.unwrap();
    room.participant("bob").handle.unmute().await.unwrap();

    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "alice converged",
        )
        .await;
    room.participant("bob")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "bob converged",
        )
        .await;

    // t-alice < t-bob: alice keeps her offer, bob abandons his and answers.
    let alice = room.participant("alice");
    assert_eq!(alice.engine.open_link_count(), 1);
    assert_eq!(alice.engine.links().len(), 1);

    let bob = room.participant("bob");
    assert_eq!(bob.engine.open_link_count(), 1);
    let bob_links = bob.engine.links_for(&TransportId::new("t-alice"));
    assert_eq!(bob_links.len(), 2, "bob's own offer link plus the answering link");
    assert!(bob_links[0].is_closed());
    assert!(!bob_links[1].is_closed());

    assert_eq!(room.hub().frames_for("voice-offer").len(), 2);
    assert_eq!(room.hub().frames_for("voice-answer").len(), 1);

    room.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_offer_is_answered_once() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    room.join("alice").unwrap();
    room.join("bob").unwrap();
    room.broadcast_view().await.unwrap();

    room.participant("bob").handle.unmute().await.unwrap();
    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "alice answered bob",
        )
        .await;

    // Replay bob's offer as a duplicate relay delivery.
    let offer = room.hub().frames_for("voice-offer")[0].clone();
    room.hub().deliver(
        &TransportId::new("t-alice"),
        voicemesh::signaling::RelayFrame {
            event: offer.event,
            sender: Some(offer.sender),
            payload: offer.payload,
        },
    );

    // Alice keeps her single link and does not answer again.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let alice = room.participant("alice");
    assert_eq!(alice.engine.links().len(), 1);
    assert_eq!(room.hub().frames_for("voice-answer").len(), 1);

    room.shutdown().await;
}

#[tokio::test]
async fn test_late_answer_and_stray_candidate_are_harmless() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    room.join("alice").unwrap();
    room.join("bob").unwrap();
    room.broadcast_view().await.unwrap();

    // An answer for an offer alice never made, from a transport that is
    // not even in the room.
    room.hub().deliver(
        &TransportId::new("t-alice"),
        voicemesh::signaling::RelayFrame {
            event: "voice-answer".to_string(),
            sender: Some(TransportId::new("t-ghost")),
            payload: serde_json::json!({
                "roomId": "room-mesh",
                "answer": {"type": "answer", "sdp": "v=0 stale"},
                "targetTransportId": "t-alice",
            }),
        },
    );
    // A candidate for a link that does not exist.
    room.hub().deliver(
        &TransportId::new("t-alice"),
        voicemesh::signaling::RelayFrame {
            event: "voice-ice-candidate".to_string(),
            sender: Some(TransportId::new("t-ghost")),
            payload: serde_json::json!({
                "roomId": "room-mesh",
                "candidate": {"candidate": "candidate:stray"},
                "targetTransportId": "t-alice",
            }),
        },
    );

    // The session is still alive and negotiates normally afterwards.
    room.participant("alice").handle.unmute().await.unwrap();
    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "alice still negotiates after stray frames",
        )
        .await;
    assert!(room
        .participant("alice")
        .engine
        .links_for(&TransportId::new("t-ghost"))
        .is_empty());

    room.shutdown().await;
}

#[tokio::test]
async fn test_offer_failure_is_isolated_per_peer() {
    harness::init_logging();
    let mut room = TestRoom::new("room-mesh");
    for name in ["alice", "bob", "carol"] {
        room.join(name).unwrap();
    }
    room.broadcast_view().await.unwrap();

    // The first link alice opens fails outright; the second peer still
    // connects.
    room.participant("alice").engine.fail_next_open("no route");
    room.participant("alice").handle.unmute().await.unwrap();

    room.participant("alice")
        .expect_event(
            |e| matches!(e, VoiceEvent::PeerConnected { .. }),
            "the surviving peer connects",
        )
        .await;
    assert_eq!(room.participant("alice").engine.open_link_count(), 1);
    assert_eq!(room.hub().frames_for("voice-offer").len(), 1);

    room.shutdown().await;
}
