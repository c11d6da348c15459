//! Gain envelopes applied to interleaved blocks

/// Multiply interleaved samples by a gain ramping linearly from `from` to `to`
pub fn apply_ramp(samples: &mut [f32], channels: u16, from: f32, to: f32) {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    if frames == 0 {
        return;
    }
    let step = (to - from) / frames as f32;
    for (i, frame) in samples.chunks_mut(channels).enumerate() {
        let gain = from + step * i as f32;
        for s in frame {
            *s *= gain;
        }
    }
}

/// Ramp only the first `fade_frames` sample frames from 0 to 1
pub fn apply_fade_in(samples: &mut [f32], channels: u16, fade_frames: usize) {
    let channels = channels.max(1) as usize;
    let len = fade_frames.min(samples.len() / channels) * channels;
    apply_ramp(&mut samples[..len], channels as u16, 0.0, 1.0);
}

/// Envelope for the `k`-th consecutive concealed block (k starts at 1)
///
/// Each repeat decays to half the previous one, so a long gap fades out
/// instead of looping the same audio at full level.
pub fn concealment_gains(k: u32) -> (f32, f32) {
    let start = 0.5f32.powi(k.saturating_sub(1).min(30) as i32);
    (start, start * 0.5)
}

/// Linear fade-to-silence over a fixed window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionFade {
    /// Clock position where the fade starts (ms)
    pub start_ms: u64,
    /// Fade length (ms)
    pub duration_ms: u64,
}

impl SessionFade {
    /// Gain at clock position `at_ms`
    pub fn gain_at(&self, at_ms: u64) -> f32 {
        if at_ms <= self.start_ms {
            return 1.0;
        }
        if self.duration_ms == 0 {
            return 0.0;
        }
        let elapsed = (at_ms - self.start_ms) as f32 / self.duration_ms as f32;
        (1.0 - elapsed).clamp(0.0, 1.0)
    }

    /// Whether the fade has reached silence at `at_ms`
    pub fn is_complete(&self, at_ms: u64) -> bool {
        at_ms >= self.start_ms + self.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_is_per_frame() {
        let mut samples = vec![1.0; 8];
        apply_ramp(&mut samples, 2, 1.0, 0.0);

        assert_eq!(samples[0], samples[1]);
        assert_eq!(samples[0], 1.0);
        assert!((samples[6] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_fade_in_prefix_only() {
        let mut samples = vec![1.0; 10];
        apply_fade_in(&mut samples, 1, 4);

        assert_eq!(samples[0], 0.0);
        assert!(samples[3] < 1.0);
        assert_eq!(samples[4], 1.0);
    }

    #[test]
    fn test_concealment_decays() {
        assert_eq!(concealment_gains(1), (1.0, 0.5));
        assert_eq!(concealment_gains(2), (0.5, 0.25));
    }

    #[test]
    fn test_session_fade() {
        let fade = SessionFade {
            start_ms: 1000,
            duration_ms: 500,
        };
        assert_eq!(fade.gain_at(900), 1.0);
        assert!((fade.gain_at(1250) - 0.5).abs() < 1e-6);
        assert_eq!(fade.gain_at(1600), 0.0);
        assert!(fade.is_complete(1500));
        assert!(!fade.is_complete(1499));
    }
}
