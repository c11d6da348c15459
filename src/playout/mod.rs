//! Receiver-side playout
//!
//! A [`PlayoutSession`] owns everything one listening session needs: one
//! jitter buffer per declared tier, the ABR controller, the playhead and the
//! fade state. It is created fresh for every session and dropped on stop;
//! nothing here is global.

pub mod engine;
pub mod session;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::abr::AbrConfig;
use crate::audio::jitter::JitterConfig;
use crate::codec::PayloadFormat;
use crate::constants::*;

pub use engine::run_playout;
pub use session::{PlayoutSession, SessionIngress, SessionStats, TickReport};

/// Playout session parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration of one frame, and of one control interval
    pub frame_duration_ms: u64,
    /// How many frame intervals the playhead runs ahead of the output clock
    pub lookahead_frames: u32,
    pub payload_format: PayloadFormat,
    /// Fade-to-silence length at end of stream
    pub end_fade_ms: u64,
    /// Fade-in on the first real frame after concealment
    pub recovery_fade_ms: u64,
    /// Capacity of the pre-decoded output queue, in blocks
    pub output_queue_blocks: usize,
    pub jitter: JitterConfig,
    pub abr: AbrConfig,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            lookahead_frames: DEFAULT_LOOKAHEAD_FRAMES,
            payload_format: PayloadFormat::Pcm,
            end_fade_ms: 2_000,
            recovery_fade_ms: 5,
            output_queue_blocks: 64,
            jitter: JitterConfig::default(),
            abr: AbrConfig::default(),
        }
    }
}

impl PlayoutConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms)
    }

    pub fn lookahead(&self) -> Duration {
        self.frame_interval() * self.lookahead_frames
    }

    /// Sample frames (per channel) in one frame interval
    pub fn frame_size(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms / 1000) as usize
    }

    /// Interleaved samples in one block
    pub fn samples_per_block(&self) -> usize {
        self.frame_size() * self.channels as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.frame_duration_ms == 0 {
            return Err("frame_duration_ms must be positive".into());
        }
        if self.channels == 0 || self.sample_rate == 0 {
            return Err("sample_rate and channels must be positive".into());
        }
        let abr = &self.abr;
        if abr.min_tier == 0 || abr.min_tier > abr.max_tier {
            return Err(format!(
                "tier range {}..={} is empty or starts at 0",
                abr.min_tier, abr.max_tier
            ));
        }
        if !(abr.min_tier..=abr.max_tier).contains(&abr.initial_tier) {
            return Err(format!("initial tier {} outside range", abr.initial_tier));
        }
        if self.jitter.max_frames == 0 {
            return Err("jitter.max_frames must be positive".into());
        }
        Ok(())
    }
}
