//! Opus payload encoder, one instance per tier

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use super::PayloadEncoder;
use crate::error::CodecError;

/// Opus encoder wrapper with a fixed bitrate
pub struct OpusEncoder {
    encoder: Encoder,
    channels: u16,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bitrate: u32,
    ) -> Result<Self, CodecError> {
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

        let mut encoder = Encoder::new(sample_rate, opus_channels, Application::Audio)
            .map_err(|e| CodecError::Init(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::Init(format!("Failed to set bitrate: {}", e)))?;

        // Loss is concealed on the receiver, in-band FEC is left off
        encoder
            .set_inband_fec(false)
            .map_err(|e| CodecError::Init(format!("Failed to set FEC: {}", e)))?;

        Ok(Self {
            encoder,
            channels,
            frame_size,
            encode_buffer: vec![0u8; 4000],
        })
    }

    /// Expected samples per call, all channels
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }
}

impl PayloadEncoder for OpusEncoder {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodeFailure(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }
}
