use std::time::{Duration, Instant};

use tiercast::abr::{SwitchReason, TierSwitch};
use tiercast::audio::{AudioBlock, AudioSink, BlockSource, ToneGenerator};
use tiercast::client::{self, BroadcastClient};
use tiercast::codec::{PayloadEncoder, PcmEncoder};
use tiercast::playout::{PlayoutConfig, PlayoutSession, TickReport};
use tiercast::protocol::{ControlMessage, Frame};
use tiercast::relay::{ConnectParams, RelayConfig, RelayServer};

const STREAM: u32 = 21;
const FRAME_MS: u64 = 20;

/// Keeps every block, including ones a flush would discard
#[derive(Default)]
struct Recorder {
    blocks: Vec<AudioBlock>,
}

impl AudioSink for Recorder {
    fn schedule(&mut self, block: AudioBlock) {
        self.blocks.push(block);
    }
}

struct Producer {
    tone: ToneGenerator,
    encoder: PcmEncoder,
    frame_size: usize,
}

impl Producer {
    fn new(config: &PlayoutConfig) -> Self {
        Self {
            tone: ToneGenerator::new(440.0, config.sample_rate, config.channels),
            encoder: PcmEncoder::new(config.channels, config.frame_size()),
            frame_size: config.frame_size(),
        }
    }

    fn frame(&mut self, tier: u8, seq: u32) -> Frame {
        let samples = self.tone.next_block(self.frame_size);
        let payload = self.encoder.encode(&samples).unwrap();
        Frame::new(STREAM, tier, seq, u64::from(seq) * FRAME_MS, payload)
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Drive a session in simulated time, one frame interval per step
fn simulate(
    steps: u64,
    tiers: &[u8],
    mut drop: impl FnMut(u8, u32) -> bool,
    mut at_step: impl FnMut(u64, &PlayoutSession),
) -> (Recorder, Vec<TickReport>, PlayoutSession) {
    let config = PlayoutConfig::default();
    let mut session = PlayoutSession::new(STREAM, config.clone()).unwrap();
    let ingress = session.ingress();
    let mut producer = Producer::new(&config);
    let mut sink = Recorder::default();
    let mut reports = Vec::new();
    let base = Instant::now();

    for step in 0..steps {
        let wall = base + ms(step * FRAME_MS);
        let seq = step as u32 + 1;
        for &tier in tiers {
            let frame = producer.frame(tier, seq);
            if !drop(tier, seq) {
                ingress.ingest_frame(frame, wall).unwrap();
            }
        }
        at_step(step, &session);

        let report = session.tick_at(ms(step * FRAME_MS), wall, &mut sink);
        let stopped = report.stopped;
        reports.push(report);
        if stopped {
            break;
        }
    }

    (sink, reports, session)
}

#[test]
fn test_clean_feed_plays_initial_tier_without_gaps() {
    let (sink, reports, session) = simulate(250, &[2], |_, _| false, |_, _| {});

    // Nothing before the 300 ms preroll
    assert!(reports[..15].iter().all(|r| r.scheduled == 0));
    assert_eq!(reports[15].scheduled, 10);

    assert!(!sink.blocks.is_empty());
    for (i, block) in sink.blocks.iter().enumerate() {
        assert_eq!(block.tier, 2);
        assert_eq!(block.source, BlockSource::Frame);
        assert_eq!(block.start, ms(300 + i as u64 * FRAME_MS));
        assert_eq!(block.samples.len(), 960 * 2);
    }
    assert!(sink.blocks.iter().all(|b| b.samples.iter().any(|s| s.abs() > 0.01)));

    assert!(reports.iter().all(|r| r.switches.is_empty()));
    let stats = session.stats();
    assert_eq!(stats.current_tier, 2);
    assert_eq!(stats.blocks_concealed, 0);
    assert_eq!(stats.blocks_real as usize, sink.blocks.len());
}

#[test]
fn test_lossy_tier_downgrades_to_clean_tier() {
    // Every fourth frame of tier 2 is lost in transit
    let (sink, reports, session) = simulate(250, &[1, 2], |tier, seq| tier == 2 && seq % 4 == 0, |_, _| {});

    let switches: Vec<TierSwitch> = reports.iter().flat_map(|r| r.switches.clone()).collect();
    assert_eq!(
        switches,
        vec![TierSwitch {
            from: 2,
            to: 1,
            reason: SwitchReason::Loss
        }]
    );
    assert_eq!(session.current_tier(), 1);

    let tail = &sink.blocks[sink.blocks.len() - 50..];
    assert!(tail.iter().all(|b| b.tier == 1 && b.source == BlockSource::Frame));

    // Concealment covered the holes before the switch
    assert!(sink.blocks.iter().any(|b| b.source == BlockSource::Concealed));
    assert!(sink.blocks.iter().all(|b| b.source != BlockSource::Silence));

    // Timeline has no gaps or overlaps across the switch
    for pair in sink.blocks.windows(2) {
        assert_eq!(pair[1].start, pair[0].start + ms(FRAME_MS));
    }
}

#[test]
fn test_clean_multi_tier_feed_upgrades_after_stable_stretch() {
    let (sink, reports, session) = simulate(1000, &[1, 2, 3], |_, _| false, |_, _| {});

    let switches: Vec<TierSwitch> = reports.iter().flat_map(|r| r.switches.clone()).collect();
    assert_eq!(
        switches,
        vec![TierSwitch {
            from: 2,
            to: 3,
            reason: SwitchReason::Stable
        }]
    );
    assert_eq!(session.current_tier(), 3);

    // 15 s of playback must pass first; playback starts at step 15
    let upgraded_at = reports.iter().position(|r| !r.switches.is_empty()).unwrap();
    assert!(upgraded_at >= 750, "upgraded at step {}", upgraded_at);

    let tail = &sink.blocks[sink.blocks.len() - 50..];
    assert!(tail.iter().all(|b| b.tier == 3 && b.source == BlockSource::Frame));
    assert_eq!(session.stats().blocks_concealed, 0);
    for pair in sink.blocks.windows(2) {
        assert_eq!(pair[1].start, pair[0].start + ms(FRAME_MS));
    }
}

#[test]
fn test_stream_ending_fades_out_and_tears_down() {
    let (sink, reports, session) = simulate(
        250,
        &[2],
        |_, _| false,
        |step, session| {
            if step == 100 {
                let msg = ControlMessage::StreamEnding { countdown: 1 }.to_text();
                session.ingress().ingest_text(&msg).unwrap();
            }
        },
    );

    let last = reports.last().unwrap();
    assert!(last.finished);
    assert!(last.stopped);
    assert!(reports.len() < 250);
    assert!(session.is_torn_down());

    let final_block = sink.blocks.last().unwrap();
    let tail = &final_block.samples[final_block.samples.len() - 2..];
    assert!(tail.iter().all(|s| s.abs() < 0.01));

    // Audio before the notice was at full level
    let early = &sink.blocks[20];
    assert!(early.samples.iter().any(|s| s.abs() > 0.2));
}

#[tokio::test]
async fn test_listener_pump_feeds_session_through_relay() {
    let config = RelayConfig {
        bind_address: "127.0.0.1".into(),
        port: 0,
        stats_interval_secs: 0,
        ..Default::default()
    };
    let server = RelayServer::new(config);
    let registry = server.registry();
    let (addr, _handle) = server.start_background().await.unwrap();
    let url = format!("ws://{}/ws", addr);

    let playout = PlayoutConfig::default();
    let session = PlayoutSession::new(STREAM, playout.clone()).unwrap();
    let ingress = session.ingress();

    let listen_url = url.clone();
    let listen_ingress = ingress.clone();
    let pump = tokio::spawn(async move {
        client::listen(&listen_url, &ConnectParams::listener(STREAM), listen_ingress).await
    });

    let mut broadcaster = BroadcastClient::connect(&url, STREAM).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !(registry.has_producer(STREAM) && registry.consumer_count(STREAM) == 1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut producer = Producer::new(&playout);
    for seq in 1..=100 {
        broadcaster.send_frame(&producer.frame(2, seq)).await.unwrap();
    }
    broadcaster
        .send_control(&ControlMessage::StreamEnding { countdown: 2 })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while ingress.tier_stats()[&2].received < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    ingress.request_stop();
    let report = tokio::time::timeout(Duration::from_secs(5), pump)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.frames, 100);
    assert_eq!(report.rejected, 0);
}
