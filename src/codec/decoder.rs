//! Opus payload decoder

use opus::{Channels, Decoder};

use super::PayloadDecoder;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    channels: u16,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<f32>,
    frames_decoded: u64,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::Init(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::Init(e.to_string()))?;

        // 120ms is the longest Opus packet
        let decode_buffer = vec![0.0f32; sample_rate as usize * channels as usize * 120 / 1000];

        Ok(Self {
            decoder,
            channels,
            decode_buffer,
            frames_decoded: 0,
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl PayloadDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<f32>, CodecError> {
        let samples = self
            .decoder
            .decode_float(payload, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodeFailure(e.to_string()))?;

        let total = samples * self.channels as usize;
        self.frames_decoded += 1;
        Ok(self.decode_buffer[..total].to_vec())
    }

    fn reset(&mut self) {
        if let Err(e) = self.decoder.reset_state() {
            tracing::warn!("Opus decoder reset failed: {}", e);
        }
    }
}
