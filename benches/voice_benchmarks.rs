//! Voice Mesh Performance Benchmarks
//!
//! Benchmarks for:
//! - Event naming transform (prefix apply/strip on the relay hot path)
//! - Signaling payload serialization/deserialization
//! - Registry routing and glare tie-break under peer-count sweeps

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use voicemesh::engine::{IceCandidate, SessionDescription};
use voicemesh::signaling::{
    CandidatePayload, OfferPayload, RelayAdapter, RelayFrame, RelayTransport,
};
use voicemesh::{Result, RoomId, TransportId};

/// Publish into the void; the adapters under test only pay for encoding.
struct NullTransport;

#[async_trait::async_trait]
impl RelayTransport for NullTransport {
    async fn publish(&self, _event: &str, _payload: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

fn adapter(prefix: Option<&str>) -> RelayAdapter {
    RelayAdapter::new(Arc::new(NullTransport), prefix.map(str::to_string))
}

// ============================================================================
// Event naming transform
// ============================================================================

mod naming_bench {
    use super::*;

    pub fn bench_wire_name(c: &mut Criterion) {
        let mut group = c.benchmark_group("naming/wire_name");
        for prefix in [None, Some("uno")] {
            let adapter = adapter(prefix);
            let label = prefix.unwrap_or("bare");
            group.bench_function(BenchmarkId::from_parameter(label), |b| {
                b.iter(|| adapter.wire_name(black_box("voice-ice-candidate")))
            });
        }
        group.finish();
    }

    pub fn bench_base_name(c: &mut Criterion) {
        let mut group = c.benchmark_group("naming/base_name");
        let prefixed = adapter(Some("uno"));
        group.bench_function("match", |b| {
            b.iter(|| prefixed.base_name(black_box("uno:voice-offer")))
        });
        group.bench_function("foreign", |b| {
            b.iter(|| prefixed.base_name(black_box("chess:voice-offer")))
        });
        group.finish();
    }
}

// ============================================================================
// Payload serde
// ============================================================================

mod serde_bench {
    use super::*;

    fn offer_payload(sdp_len: usize) -> OfferPayload {
        OfferPayload {
            room_id: RoomId::new("room-bench"),
            offer: SessionDescription::offer("v=0\r\n".repeat(sdp_len / 5)),
            target_transport_id: TransportId::new("t-target"),
        }
    }

    pub fn bench_offer_encode(c: &mut Criterion) {
        let mut group = c.benchmark_group("serde/offer_encode");
        // Realistic audio-only SDPs run a few kilobytes.
        for size in [512usize, 2048, 8192] {
            let payload = offer_payload(size);
            let bytes = serde_json::to_vec(&payload).unwrap().len();
            group.throughput(Throughput::Bytes(bytes as u64));
            group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
                b.iter(|| serde_json::to_value(black_box(payload)).unwrap())
            });
        }
        group.finish();
    }

    pub fn bench_frame_classify(c: &mut Criterion) {
        let adapter = adapter(Some("uno"));
        let frame = RelayFrame {
            event: "uno:voice-ice-candidate".to_string(),
            sender: Some(TransportId::new("t-sender")),
            payload: serde_json::to_value(CandidatePayload {
                room_id: RoomId::new("room-bench"),
                candidate: IceCandidate {
                    candidate: "candidate:1 1 UDP 2122252543 192.0.2.1 49203 typ host".to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                },
                target_transport_id: TransportId::new("t-target"),
            })
            .unwrap(),
        };
        c.bench_function("serde/frame_classify", |b| {
            b.iter(|| adapter.classify(black_box(&frame)).unwrap())
        });
    }
}

// ============================================================================
// Registry sweeps
// ============================================================================

mod registry_bench {
    use super::*;
    use tokio::sync::mpsc;
    use voicemesh::engine::mock::{MockCaptureTrack, MockEngine};
    use voicemesh::engine::CaptureTrack;
    use voicemesh::peer::PeerRegistry;

    async fn offer_sweep(peers: usize) {
        let engine = MockEngine::new();
        engine.set_candidates_per_link(0);
        let (tx, _rx) = mpsc::channel(peers.max(1) * 4);
        let mut registry =
            PeerRegistry::new(Arc::new(engine), TransportId::new("t-local"), tx);
        let track: Arc<dyn CaptureTrack> = MockCaptureTrack::new();
        for i in 0..peers {
            let remote = TransportId::new(format!("t-peer-{:04}", i));
            let offer = registry.offer_to(&remote, Arc::clone(&track)).await.unwrap();
            black_box(offer);
        }
        registry.close_all().await;
    }

    pub fn bench_offer_fanout(c: &mut Criterion) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut group = c.benchmark_group("registry/offer_fanout");
        for peers in [2usize, 8, 32] {
            group.throughput(Throughput::Elements(peers as u64));
            group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, &peers| {
                b.to_async(&rt).iter(|| offer_sweep(peers))
            });
        }
        group.finish();
    }

    async fn glare_sweep(rounds: usize) {
        let engine = MockEngine::new();
        engine.set_candidates_per_link(0);
        let (tx, _rx) = mpsc::channel(rounds.max(1) * 4);
        // The larger local id always yields: every round closes its own
        // offer and answers, the worst-case glare path.
        let mut registry =
            PeerRegistry::new(Arc::new(engine), TransportId::new("t-zzzz"), tx);
        let track: Arc<dyn CaptureTrack> = MockCaptureTrack::new();
        let offer = SessionDescription::offer("v=0 theirs");
        for i in 0..rounds {
            let remote = TransportId::new(format!("t-peer-{:04}", i));
            registry.offer_to(&remote, Arc::clone(&track)).await.unwrap();
            let answer = registry
                .accept_offer(&remote, &offer, Arc::clone(&track))
                .await
                .unwrap();
            black_box(answer);
        }
        registry.close_all().await;
    }

    pub fn bench_glare_resolution(c: &mut Criterion) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut group = c.benchmark_group("registry/glare_resolution");
        for rounds in [2usize, 8, 32] {
            group.throughput(Throughput::Elements(rounds as u64));
            group.bench_with_input(BenchmarkId::from_parameter(rounds), &rounds, |b, &rounds| {
                b.to_async(&rt).iter(|| glare_sweep(rounds))
            });
        }
        group.finish();
    }
}

criterion_group!(
    naming_benches,
    naming_bench::bench_wire_name,
    naming_bench::bench_base_name
);
criterion_group!(
    serde_benches,
    serde_bench::bench_offer_encode,
    serde_bench::bench_frame_classify
);
criterion_group!(
    registry_benches,
    registry_bench::bench_offer_fanout,
    registry_bench::bench_glare_resolution
);
criterion_main!(naming_benches, serde_benches, registry_benches);
