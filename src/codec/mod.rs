//! Payload codecs
//!
//! The frame format never looks inside payloads. The playout engine decodes
//! with a primary [`PayloadDecoder`] and falls back to raw PCM when that
//! fails, which covers a producer that has not started encoding yet.

pub mod pcm;

#[cfg(feature = "opus-codec")]
pub mod decoder;
#[cfg(feature = "opus-codec")]
pub mod encoder;

use bytes::Bytes;

use crate::error::CodecError;

pub use pcm::{PcmDecoder, PcmEncoder};

#[cfg(feature = "opus-codec")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus-codec")]
pub use encoder::OpusEncoder;

/// Turns one frame payload into interleaved f32 samples
pub trait PayloadDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<f32>, CodecError>;

    /// Drop any inter-frame state
    fn reset(&mut self) {}
}

/// Turns one frame interval of interleaved samples into a payload
pub trait PayloadEncoder: Send {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError>;
}

/// Payload format negotiated out of band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Little-endian i16 interleaved samples
    #[default]
    Pcm,
    /// Opus packets
    Opus,
}

/// Build the primary decoder for a payload format
pub fn create_decoder(
    format: PayloadFormat,
    sample_rate: u32,
    channels: u16,
) -> Result<Box<dyn PayloadDecoder>, CodecError> {
    match format {
        PayloadFormat::Pcm => Ok(Box::new(PcmDecoder::new(channels))),
        #[cfg(feature = "opus-codec")]
        PayloadFormat::Opus => Ok(Box::new(OpusDecoder::new(sample_rate, channels)?)),
        #[cfg(not(feature = "opus-codec"))]
        PayloadFormat::Opus => {
            let _ = sample_rate;
            Err(CodecError::Init("built without the opus-codec feature".into()))
        }
    }
}

/// Build an encoder for a payload format; `bitrate` only applies to Opus
pub fn create_encoder(
    format: PayloadFormat,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    bitrate: u32,
) -> Result<Box<dyn PayloadEncoder>, CodecError> {
    match format {
        PayloadFormat::Pcm => Ok(Box::new(PcmEncoder::new(channels, frame_size))),
        #[cfg(feature = "opus-codec")]
        PayloadFormat::Opus => Ok(Box::new(OpusEncoder::new(
            sample_rate,
            channels,
            frame_size,
            bitrate,
        )?)),
        #[cfg(not(feature = "opus-codec"))]
        PayloadFormat::Opus => {
            let _ = (sample_rate, bitrate);
            Err(CodecError::Init("built without the opus-codec feature".into()))
        }
    }
}
