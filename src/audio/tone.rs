//! Sine test tone for the broadcaster

use std::f32::consts::TAU;

pub struct ToneGenerator {
    phase: f32,
    step: f32,
    channels: u16,
    amplitude: f32,
}

impl ToneGenerator {
    pub fn new(frequency: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / sample_rate.max(1) as f32,
            channels: channels.max(1),
            amplitude: 0.25,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Next `frames` sample frames, interleaved, same value on every channel
    pub fn next_block(&mut self, frames: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * self.channels as usize);
        for _ in 0..frames {
            let sample = self.phase.sin() * self.amplitude;
            out.extend(std::iter::repeat(sample).take(self.channels as usize));
            self.phase = (self.phase + self.step) % TAU;
        }
        out
    }
}
