//! One listening session: tier buffers, ABR and the playhead

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::PlayoutConfig;
use crate::abr::{AbrController, TierSnapshot, TierSwitch, TierView};
use crate::audio::buffer::{AudioBlock, BlockSource};
use crate::audio::envelope::{apply_fade_in, apply_ramp, concealment_gains, SessionFade};
use crate::audio::jitter::{create_shared_jitter, JitterStats, Pop, SharedJitterBuffer};
use crate::audio::playback::AudioSink;
use crate::codec::{create_decoder, PayloadDecoder, PcmDecoder};
use crate::error::{Error, PlayoutError, ProtocolError};
use crate::protocol::{self, ControlMessage, Frame};

/// State shared between the network side and the playout loop
struct Shared {
    stream_id: u32,
    tiers: BTreeMap<u8, SharedJitterBuffer>,
    stopping: AtomicBool,
    /// Countdown from a `stream_ending` message not yet picked up
    pending_end: Mutex<Option<u32>>,
    malformed: AtomicU64,
    rejected: AtomicU64,
}

/// Network-facing handle: feeds frames and control messages into a session
#[derive(Clone)]
pub struct SessionIngress {
    shared: Arc<Shared>,
}

impl SessionIngress {
    /// Decode one binary message and buffer it
    pub fn ingest_binary(&self, data: &[u8]) -> Result<(), Error> {
        let frame = protocol::decode(data).map_err(|e| {
            self.shared.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Discarding frame: {}", e);
            e
        })?;
        self.ingest_frame(frame, Instant::now())?;
        Ok(())
    }

    /// Buffer one decoded frame into its tier
    pub fn ingest_frame(&self, frame: Frame, now: Instant) -> Result<(), PlayoutError> {
        if self.is_stopping() {
            return Err(PlayoutError::Stopped);
        }
        if frame.stream_id != self.shared.stream_id {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PlayoutError::StreamMismatch {
                expected: self.shared.stream_id,
                got: frame.stream_id,
            });
        }
        let Some(buffer) = self.shared.tiers.get(&frame.tier) else {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PlayoutError::UndeclaredTier(frame.tier));
        };

        buffer.lock().push(frame, now);
        Ok(())
    }

    /// Handle a text message from the relay
    pub fn ingest_text(&self, text: &str) -> Result<ControlMessage, ProtocolError> {
        let msg = ControlMessage::parse(text)?;
        match msg {
            ControlMessage::StreamEnding { countdown } => {
                tracing::info!("Stream {} ending in {}s", self.shared.stream_id, countdown);
                *self.shared.pending_end.lock() = Some(countdown);
            }
        }
        Ok(msg)
    }

    /// Ask the playout loop to tear the session down
    pub fn request_stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    pub fn stream_id(&self) -> u32 {
        self.shared.stream_id
    }

    /// Per-tier jitter buffer counters
    pub fn tier_stats(&self) -> BTreeMap<u8, JitterStats> {
        self.shared
            .tiers
            .iter()
            .map(|(&t, buf)| (t, buf.lock().stats()))
            .collect()
    }
}

/// What one `tick` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub scheduled: usize,
    pub switches: Vec<TierSwitch>,
    /// End-of-stream fade played out; session torn down
    pub finished: bool,
    pub stopped: bool,
}

/// Session counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub stream_id: u32,
    pub current_tier: u8,
    pub playing: bool,
    pub blocks_scheduled: u64,
    pub blocks_real: u64,
    pub blocks_concealed: u64,
    pub blocks_silent: u64,
    pub starved: u64,
    pub decode_fallbacks: u64,
    pub decode_failures: u64,
    pub underruns: u64,
    pub tier_switches: u64,
    pub malformed_frames: u64,
    pub rejected_frames: u64,
    pub tiers: BTreeMap<u8, JitterStats>,
}

/// Playout state for one session
pub struct PlayoutSession {
    config: PlayoutConfig,
    shared: Arc<Shared>,
    abr: AbrController,
    decoder: Box<dyn PayloadDecoder>,
    fallback: PcmDecoder,
    /// Output-clock time of the next block to schedule
    playhead: Option<Duration>,
    /// Last real frame served from any tier
    last_real: Option<Frame>,
    concealed_run: u32,
    fade: Option<SessionFade>,
    /// Fade reached silence; tear down once the clock passes this point
    drain_until: Option<Duration>,
    torn_down: bool,
    stats: SessionStats,
}

impl PlayoutSession {
    pub fn new(stream_id: u32, config: PlayoutConfig) -> Result<Self, Error> {
        config.validate().map_err(PlayoutError::InvalidConfig)?;

        let decoder = create_decoder(config.payload_format, config.sample_rate, config.channels)?;

        let tiers = config
            .abr
            .tiers()
            .map(|t| (t, create_shared_jitter(config.jitter.clone())))
            .collect();

        let shared = Arc::new(Shared {
            stream_id,
            tiers,
            stopping: AtomicBool::new(false),
            pending_end: Mutex::new(None),
            malformed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });

        tracing::info!(
            "Playout session for stream {}: tiers {}..={}, {}ms frames, {}ms lookahead",
            stream_id,
            config.abr.min_tier,
            config.abr.max_tier,
            config.frame_duration_ms,
            config.lookahead().as_millis()
        );

        Ok(Self {
            abr: AbrController::new(config.abr.clone()),
            fallback: PcmDecoder::new(config.channels),
            decoder,
            shared,
            playhead: None,
            last_real: None,
            concealed_run: 0,
            fade: None,
            drain_until: None,
            torn_down: false,
            stats: SessionStats {
                stream_id,
                ..Default::default()
            },
            config,
        })
    }

    /// Handle for the network task
    pub fn ingress(&self) -> SessionIngress {
        SessionIngress {
            shared: self.shared.clone(),
        }
    }

    pub fn config(&self) -> &PlayoutConfig {
        &self.config
    }

    pub fn frame_interval(&self) -> Duration {
        self.config.frame_interval()
    }

    pub fn current_tier(&self) -> u8 {
        self.abr.current_tier()
    }

    /// Whether playback has begun
    pub fn is_playing(&self) -> bool {
        self.playhead.is_some()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn playhead(&self) -> Option<Duration> {
        self.playhead
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.current_tier = self.abr.current_tier();
        stats.playing = self.playhead.is_some();
        stats.tier_switches = self.abr.switch_count();
        stats.malformed_frames = self.shared.malformed.load(Ordering::Relaxed);
        stats.rejected_frames = self.shared.rejected.load(Ordering::Relaxed);
        stats.tiers = self.ingress().tier_stats();
        stats
    }

    /// Schedule blocks up to `lookahead` past the output clock
    pub fn tick(&mut self, now: Duration, sink: &mut dyn AudioSink) -> TickReport {
        self.tick_at(now, Instant::now(), sink)
    }

    /// `tick` with an explicit wall-clock instant for the jitter gates
    pub fn tick_at(&mut self, now: Duration, wall: Instant, sink: &mut dyn AudioSink) -> TickReport {
        let mut report = TickReport::default();

        if self.is_stopping() {
            self.stop(sink);
            report.stopped = true;
            return report;
        }

        if let Some(until) = self.drain_until {
            if now >= until {
                tracing::info!("End-of-stream fade played out, stopping session");
                self.stop(sink);
                report.finished = true;
                report.stopped = true;
            }
            return report;
        }

        let pending_end = self.shared.pending_end.lock().take();
        if let Some(countdown) = pending_end {
            self.begin_end_fade(now, countdown);
        }

        let interval = self.config.frame_interval();
        let horizon = now + self.config.lookahead();

        let mut playhead = match self.playhead {
            Some(p) if p >= now => p,
            Some(p) => {
                self.stats.underruns += 1;
                tracing::debug!(
                    "Playhead {}ms behind output clock, resyncing",
                    (now - p).as_millis()
                );
                now
            }
            None => now,
        };

        while playhead < horizon {
            if self.is_stopping() {
                break;
            }

            let Some(block) = self.next_block(now, playhead, wall, &mut report) else {
                break;
            };

            sink.schedule(block);
            report.scheduled += 1;
            self.stats.blocks_scheduled += 1;
            playhead += interval;
            self.playhead = Some(playhead);

            let fade_done = self
                .fade
                .is_some_and(|f| f.is_complete(playhead.as_millis() as u64));
            if fade_done {
                self.drain_until = Some(playhead);
                break;
            }
        }

        report
    }

    /// Produce the block for one control interval, or None before playback starts
    fn next_block(
        &mut self,
        now: Duration,
        playhead: Duration,
        wall: Instant,
        report: &mut TickReport,
    ) -> Option<AudioBlock> {
        // Audio already handed to the sink but not yet heard
        let queued = playhead.saturating_sub(now);
        let snapshot = self.snapshot(queued);
        if let Some(switch) = self.abr.override_for_availability(&snapshot) {
            self.on_switch(switch, report);
        }

        let tier = self.abr.current_tier();
        let (pop, gate_open) = match self.shared.tiers.get(&tier) {
            Some(buffer) => {
                let mut jb = buffer.lock();
                let pop = jb.pop(wall);
                let ready = jb.is_ready(wall);
                (pop, ready)
            }
            None => (Pop::Missing, false),
        };

        if pop == Pop::NotReady && self.playhead.is_none() {
            return None;
        }

        let missed = !matches!(pop, Pop::Frame(_));
        self.abr
            .observe(missed, gate_open, self.config.frame_interval());
        let after = self.snapshot(queued);
        if let Some(switch) = self.abr.evaluate(&after) {
            self.on_switch(switch, report);
        }

        let mut block = match pop {
            Pop::Frame(frame) => {
                let mut samples = self.decode(&frame.payload);
                if self.concealed_run > 0 {
                    let fade_frames =
                        (self.config.sample_rate as u64 * self.config.recovery_fade_ms / 1000) as usize;
                    apply_fade_in(&mut samples, self.config.channels, fade_frames);
                }
                self.concealed_run = 0;
                self.last_real = Some(frame);
                self.stats.blocks_real += 1;
                self.block(samples, tier, BlockSource::Frame, playhead)
            }
            Pop::Concealed(frame) => self.conceal(Some(frame), tier, playhead),
            Pop::Missing | Pop::NotReady => {
                let last = self.last_real.clone();
                self.conceal(last, tier, playhead)
            }
        };

        if let Some(fade) = self.fade {
            let start_ms = playhead.as_millis() as u64;
            let end_ms = start_ms + self.config.frame_duration_ms;
            apply_ramp(
                &mut block.samples,
                self.config.channels,
                fade.gain_at(start_ms),
                fade.gain_at(end_ms),
            );
        }

        Some(block)
    }

    fn conceal(&mut self, source: Option<Frame>, tier: u8, playhead: Duration) -> AudioBlock {
        match source {
            Some(frame) => {
                self.concealed_run += 1;
                let mut samples = self.decode(&frame.payload);
                let (from, to) = concealment_gains(self.concealed_run);
                apply_ramp(&mut samples, self.config.channels, from, to);
                self.stats.blocks_concealed += 1;
                self.block(samples, tier, BlockSource::Concealed, playhead)
            }
            None => {
                self.stats.starved += 1;
                self.stats.blocks_silent += 1;
                tracing::debug!("{}", PlayoutError::BufferStarvation);
                self.block(Vec::new(), tier, BlockSource::Silence, playhead)
            }
        }
    }

    /// Primary decoder, then raw PCM, then silence
    fn decode(&mut self, payload: &[u8]) -> Vec<f32> {
        match self.decoder.decode(payload) {
            Ok(samples) => samples,
            Err(primary) => match self.fallback.decode(payload) {
                Ok(samples) => {
                    self.stats.decode_fallbacks += 1;
                    tracing::trace!("Primary decode failed ({}), used raw PCM", primary);
                    samples
                }
                Err(e) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!("Payload undecodable, substituting silence: {}", e);
                    Vec::new()
                }
            },
        }
    }

    fn block(
        &self,
        mut samples: Vec<f32>,
        tier: u8,
        source: BlockSource,
        start: Duration,
    ) -> AudioBlock {
        samples.resize(self.config.samples_per_block(), 0.0);
        AudioBlock {
            samples,
            channels: self.config.channels,
            start,
            tier,
            source,
        }
    }

    /// Per-tier availability, with depth measured from the output clock
    fn snapshot(&self, queued: Duration) -> TierSnapshot {
        self.shared
            .tiers
            .iter()
            .map(|(&t, buf)| {
                let jb = buf.lock();
                let has_data = jb.has_data();
                let depth_ms = if has_data {
                    jb.depth_ms() + queued.as_millis() as u64
                } else {
                    0
                };
                (t, TierView { has_data, depth_ms })
            })
            .collect()
    }

    fn on_switch(&mut self, switch: TierSwitch, report: &mut TickReport) {
        if let (Some(last), Some(buffer)) = (&self.last_real, self.shared.tiers.get(&switch.to)) {
            buffer.lock().align_to(last.presentation_time_ms);
        }
        report.switches.push(switch);
    }

    fn begin_end_fade(&mut self, now: Duration, countdown: u32) {
        let now_ms = self.playhead.unwrap_or(now).as_millis() as u64;
        let until_end = u64::from(countdown) * 1000;
        let start_ms = now_ms + until_end.saturating_sub(self.config.end_fade_ms);
        let duration_ms = self.config.end_fade_ms.min(until_end.max(self.config.frame_duration_ms));
        self.fade = Some(SessionFade {
            start_ms,
            duration_ms,
        });
    }

    /// Tear the session down; safe to call more than once
    ///
    /// Buffers and counters are cleared before the sink is flushed, so nothing
    /// can be scheduled against cleared state.
    pub fn stop(&mut self, sink: &mut dyn AudioSink) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if self.torn_down {
            return;
        }

        for buffer in self.shared.tiers.values() {
            buffer.lock().reset();
        }
        *self.shared.pending_end.lock() = None;
        self.shared.malformed.store(0, Ordering::Relaxed);
        self.shared.rejected.store(0, Ordering::Relaxed);
        self.abr = AbrController::new(self.config.abr.clone());
        self.decoder.reset();
        self.playhead = None;
        self.last_real = None;
        self.concealed_run = 0;
        self.fade = None;
        self.drain_until = None;
        self.stats = SessionStats {
            stream_id: self.shared.stream_id,
            ..Default::default()
        };

        sink.flush();
        self.torn_down = true;
        tracing::info!("Playout session for stream {} stopped", self.shared.stream_id);
    }
}
