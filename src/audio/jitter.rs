//! Per-tier jitter buffer
//!
//! Absorbs arrival-time variance for one quality tier: frames are keyed by
//! sequence number and served back in playback order at the caller's cadence,
//! with explicit concealment signals where a frame failed to arrive.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::Frame;

/// Jitter buffer construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Pre-roll delay measured from the first arrival
    pub preroll_ms: u64,
    /// Frames that must be buffered before emission starts
    pub min_fill: usize,
    /// Hard cap on buffered frames; lowest sequences evicted first
    pub max_frames: usize,
    /// Frames older than `cursor - stale_guard` are evicted on push
    pub stale_guard: u32,
    /// How far ahead `pop` looks for the nearest available frame
    pub scan_window: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            preroll_ms: 300,
            min_fill: 5,
            max_frames: 250,
            stale_guard: 50,
            scan_window: 15,
        }
    }
}

impl JitterConfig {
    pub fn preroll(&self) -> Duration {
        Duration::from_millis(self.preroll_ms)
    }
}

/// Result of one `pop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pop {
    /// Emission gate not yet satisfied
    NotReady,
    /// Real frame, in order
    Frame(Frame),
    /// Substitute for a missing frame: copy of the last real frame played
    Concealed(Frame),
    /// Missing frame and nothing played yet
    Missing,
}

impl Pop {
    /// Whether this interval was a miss (concealed or silent)
    pub fn is_miss(&self) -> bool {
        matches!(self, Pop::Concealed(_) | Pop::Missing)
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct JitterStats {
    pub buffered: usize,
    pub received: u64,
    pub played: u64,
    pub lost: u64,
    pub late: u64,
    pub concealed: u64,
    pub evicted: u64,
    pub depth_ms: u64,
}

impl JitterStats {
    pub fn loss_rate(&self) -> f32 {
        let expected = self.played + self.lost;
        if expected == 0 {
            0.0
        } else {
            self.lost as f32 / expected as f32
        }
    }
}

/// Reordering buffer for one tier
pub struct JitterBuffer {
    config: JitterConfig,
    /// Buffered frames by sequence number
    frames: BTreeMap<u32, Frame>,
    /// Next sequence to emit
    next_sequence: Option<u32>,
    /// Presentation time of the first frame seen
    origin_pts: Option<u64>,
    /// Wall-clock arrival of the first frame seen
    first_arrival: Option<Instant>,
    /// Latched once pre-roll and minimum fill are both met
    gate_open: bool,
    /// Set by the first pop past the gate; until then the cursor may move down
    emitting: bool,
    last_played: Option<Frame>,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(config: JitterConfig) -> Self {
        Self {
            config,
            frames: BTreeMap::new(),
            next_sequence: None,
            origin_pts: None,
            first_arrival: None,
            gate_open: false,
            emitting: false,
            last_played: None,
            stats: JitterStats::default(),
        }
    }

    /// Insert a frame by sequence number
    ///
    /// Returns false if the frame was discarded as late or duplicate.
    pub fn push(&mut self, frame: Frame, now: Instant) -> bool {
        let seq = frame.sequence;

        if self.first_arrival.is_none() {
            self.first_arrival = Some(now);
            self.origin_pts = Some(frame.presentation_time_ms);
            self.next_sequence = Some(seq);
        }

        if let Some(next) = self.next_sequence {
            if seq < next {
                if self.emitting {
                    self.stats.late += 1;
                    return false;
                }
                // Reordered ahead of the first emission: start earlier
                self.next_sequence = Some(seq);
                if let Some(origin) = self.origin_pts {
                    self.origin_pts = Some(origin.min(frame.presentation_time_ms));
                }
            }
        }

        if self.frames.contains_key(&seq) {
            return false;
        }

        self.frames.insert(seq, frame);
        self.stats.received += 1;

        while self.frames.len() > self.config.max_frames {
            if self.frames.pop_first().is_some() {
                self.stats.evicted += 1;
            }
        }

        if let Some(next) = self.next_sequence {
            let floor = next.saturating_sub(self.config.stale_guard);
            if floor > 0 {
                let kept = self.frames.split_off(&floor);
                self.stats.evicted += self.frames.len() as u64;
                self.frames = kept;
            }
        }

        true
    }

    /// Whether the emission gate is (or has been) satisfied
    pub fn is_ready(&mut self, now: Instant) -> bool {
        if self.gate_open {
            return true;
        }
        let Some(first) = self.first_arrival else {
            return false;
        };
        if now.saturating_duration_since(first) >= self.config.preroll()
            && self.frames.len() >= self.config.min_fill
        {
            self.gate_open = true;
        }
        self.gate_open
    }

    /// Emit the next interval's frame or concealment signal
    pub fn pop(&mut self, now: Instant) -> Pop {
        if !self.is_ready(now) {
            return Pop::NotReady;
        }
        let Some(expected) = self.next_sequence else {
            return Pop::NotReady;
        };
        self.emitting = true;

        if let Some(frame) = self.frames.remove(&expected) {
            self.next_sequence = Some(expected.wrapping_add(1));
            return self.play(frame);
        }

        let horizon = expected.saturating_add(self.config.scan_window);
        let nearest = self
            .frames
            .range(expected..=horizon)
            .next()
            .map(|(&seq, _)| seq);

        match nearest {
            Some(seq) if seq - expected >= 2 => {
                self.stats.lost += u64::from(seq - expected);
                self.next_sequence = Some(seq.wrapping_add(1));
                match self.frames.remove(&seq) {
                    Some(frame) => self.play(frame),
                    None => Pop::Missing,
                }
            }
            _ => {
                self.stats.lost += 1;
                self.next_sequence = Some(expected.wrapping_add(1));
                match &self.last_played {
                    Some(last) => {
                        self.stats.concealed += 1;
                        Pop::Concealed(last.clone())
                    }
                    None => Pop::Missing,
                }
            }
        }
    }

    fn play(&mut self, frame: Frame) -> Pop {
        self.stats.played += 1;
        self.last_played = Some(frame.clone());
        Pop::Frame(frame)
    }

    /// Resume this tier just after `played_pts` when playback switches onto it
    ///
    /// Frames at or before that presentation time are dropped without
    /// counting as loss, and the gate is opened since playback is running.
    pub fn align_to(&mut self, played_pts: u64) {
        let first = self
            .frames
            .iter()
            .find(|(_, f)| f.presentation_time_ms > played_pts)
            .map(|(&seq, _)| seq);

        let next = match first {
            Some(seq) => seq,
            None => match self.frames.last_key_value() {
                Some((&newest, _)) => newest.wrapping_add(1),
                None => return,
            },
        };

        let kept = self.frames.split_off(&next);
        self.stats.evicted += self.frames.len() as u64;
        self.frames = kept;
        self.next_sequence = Some(next);
        self.emitting = true;
        self.gate_open = true;
    }

    /// Whether any frame is buffered
    pub fn has_data(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Next sequence number to be emitted
    pub fn next_sequence(&self) -> Option<u32> {
        self.next_sequence
    }

    /// Newest buffered presentation time minus the playback position
    pub fn depth_ms(&self) -> u64 {
        let Some((_, newest)) = self.frames.last_key_value() else {
            return 0;
        };
        let base = self
            .last_played
            .as_ref()
            .map(|f| f.presentation_time_ms)
            .or(self.origin_pts)
            .unwrap_or(newest.presentation_time_ms);
        newest.presentation_time_ms.saturating_sub(base)
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            buffered: self.frames.len(),
            depth_ms: self.depth_ms(),
            ..self.stats.clone()
        }
    }

    /// Drop all frames, cursor state and counters
    pub fn reset(&mut self) {
        self.frames.clear();
        self.next_sequence = None;
        self.origin_pts = None;
        self.first_arrival = None;
        self.gate_open = false;
        self.emitting = false;
        self.last_played = None;
        self.stats = JitterStats::default();
    }
}

/// Tier buffer shared between the network task and the playout loop
pub type SharedJitterBuffer = Arc<Mutex<JitterBuffer>>;

pub fn create_shared_jitter(config: JitterConfig) -> SharedJitterBuffer {
    Arc::new(Mutex::new(JitterBuffer::new(config)))
}
