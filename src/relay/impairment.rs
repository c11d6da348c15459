//! Per-listener network impairment emulation
//!
//! A listener can ask the relay to degrade its own feed: drop frames at
//! random, cap its sustained bitrate, or both. Excess frames are dropped,
//! never queued.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::params::ConnectParams;

const WINDOW: Duration = Duration::from_secs(1);

/// Decision for one frame to one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    /// Lost to the random drop draw
    DropRandom,
    /// Would exceed the bitrate cap for this window
    DropBitrate,
}

pub struct Impairment {
    drop_rate: f64,
    max_bytes_per_window: Option<u64>,
    window_start: Option<Instant>,
    window_bytes: u64,
    rng: StdRng,
}

impl Impairment {
    /// Deliver everything
    pub fn none() -> Self {
        Self::with_rng(0.0, None, StdRng::from_entropy())
    }

    pub fn from_params(params: &ConnectParams) -> Self {
        Self::with_rng(params.drop_rate, params.max_kbps, StdRng::from_entropy())
    }

    pub fn with_rng(drop_rate: f64, max_kbps: Option<u32>, rng: StdRng) -> Self {
        Self {
            drop_rate,
            max_bytes_per_window: max_kbps.map(|kbps| u64::from(kbps) * 1000 / 8),
            window_start: None,
            window_bytes: 0,
            rng,
        }
    }

    /// Whether any impairment is configured
    pub fn is_active(&self) -> bool {
        self.drop_rate > 0.0 || self.max_bytes_per_window.is_some()
    }

    /// Decide whether a frame of `len` bytes reaches this listener
    pub fn admit(&mut self, len: usize, now: Instant) -> Verdict {
        if self.drop_rate > 0.0 && self.rng.gen::<f64>() < self.drop_rate {
            return Verdict::DropRandom;
        }

        if let Some(cap) = self.max_bytes_per_window {
            let rolled = self
                .window_start
                .map_or(true, |start| now.saturating_duration_since(start) >= WINDOW);
            if rolled {
                self.window_start = Some(now);
                self.window_bytes = 0;
            }

            let len = len as u64;
            if self.window_bytes + len > cap {
                return Verdict::DropBitrate;
            }
            self.window_bytes += len;
        }

        Verdict::Deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_delivers_everything() {
        let mut imp = Impairment::none();
        let now = Instant::now();
        assert!(!imp.is_active());
        assert!((0..1000).all(|_| imp.admit(1000, now) == Verdict::Deliver));
    }

    #[test]
    fn test_drop_rate_converges() {
        let mut imp = Impairment::with_rng(0.3, None, StdRng::seed_from_u64(7));
        let now = Instant::now();

        let dropped = (0..10_000)
            .filter(|_| imp.admit(100, now) == Verdict::DropRandom)
            .count();
        let ratio = dropped as f64 / 10_000.0;
        assert!((ratio - 0.3).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_bitrate_window() {
        // 8 kbps = 1000 bytes per second
        let mut imp = Impairment::with_rng(0.0, Some(8), StdRng::seed_from_u64(1));
        let start = Instant::now();

        assert_eq!(imp.admit(600, start), Verdict::Deliver);
        assert_eq!(imp.admit(600, start + Duration::from_millis(100)), Verdict::DropBitrate);
        assert_eq!(imp.admit(400, start + Duration::from_millis(200)), Verdict::Deliver);
        assert_eq!(imp.admit(1, start + Duration::from_millis(999)), Verdict::DropBitrate);

        // Window rolls over
        assert_eq!(imp.admit(600, start + Duration::from_millis(1000)), Verdict::Deliver);
    }
}
