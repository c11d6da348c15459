//! Raw PCM payloads (little-endian i16, interleaved)

use bytes::{BufMut, Bytes, BytesMut};

use super::{PayloadDecoder, PayloadEncoder};
use crate::error::CodecError;

/// Interprets a payload as raw i16 samples
pub struct PcmDecoder {
    channels: u16,
}

impl PcmDecoder {
    pub fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1),
        }
    }
}

impl PayloadDecoder for PcmDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<f32>, CodecError> {
        let frame_bytes = 2 * self.channels as usize;
        if payload.is_empty() || payload.len() % frame_bytes != 0 {
            return Err(CodecError::DecodeFailure(format!(
                "{} bytes is not a whole number of {}-channel i16 frames",
                payload.len(),
                self.channels
            )));
        }

        Ok(payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect())
    }
}

/// Packs f32 samples as raw i16
pub struct PcmEncoder {
    channels: u16,
    frame_size: usize,
}

impl PcmEncoder {
    pub fn new(channels: u16, frame_size: usize) -> Self {
        Self {
            channels: channels.max(1),
            frame_size,
        }
    }

    /// Expected samples per call, all channels
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }
}

impl PayloadEncoder for PcmEncoder {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for &s in samples {
            buf.put_i16_le((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_roundtrip_is_close() {
        let mut encoder = PcmEncoder::new(2, 4);
        let mut decoder = PcmDecoder::new(2);
        let samples = [0.0, 0.5, -0.5, 1.0, -1.0, 0.25, 0.1, -0.1];

        let payload = encoder.encode(&samples).unwrap();
        assert_eq!(payload.len(), 16);

        let decoded = decoder.decode(&payload).unwrap();
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_rejects_ragged_payload() {
        let mut decoder = PcmDecoder::new(2);
        assert!(decoder.decode(&[0, 1, 2]).is_err());
        assert!(decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_encoder_checks_frame_size() {
        let mut encoder = PcmEncoder::new(1, 480);
        assert_eq!(
            encoder.encode(&[0.0; 10]),
            Err(CodecError::InvalidFrameSize(10))
        );
    }
}
