//! Error types for the relay and playout engine
//!
//! Nothing here is fatal to the process: every condition either discards
//! one frame or refuses one connection.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Playout error: {0}")]
    Playout(#[from] PlayoutError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed by relay (code {0:?})")]
    ConnectionClosed(Option<u16>),
}

/// Why a frame was rejected at decode
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("truncated header ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported version {0}")]
    BadVersion(u8),

    #[error("declared payload length {declared} exceeds {available} available bytes")]
    TruncatedPayload { declared: usize, available: usize },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(MalformedReason),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Invalid control message: {0}")]
    InvalidControl(String),
}

/// Relay multiplexer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Stream {stream_id} already has a broadcaster")]
    ProducerConflict { stream_id: u32 },

    #[error("Consumer queue full, frame dropped")]
    ConsumerBackpressure,

    #[error("Invalid connection parameters: {0}")]
    InvalidParams(String),

    #[error("Unknown stream room: {0}")]
    UnknownRoom(u32),
}

/// Receiver playout errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayoutError {
    #[error("No tier has data")]
    BufferStarvation,

    #[error("Frame for undeclared tier {0}")]
    UndeclaredTier(u8),

    #[error("Frame for stream {got}, session is bound to {expected}")]
    StreamMismatch { expected: u32, got: u32 },

    #[error("Session is stopping")]
    Stopped,

    #[error("Output device error: {0}")]
    OutputDevice(String),

    #[error("Invalid playout configuration: {0}")]
    InvalidConfig(String),
}

/// Payload codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    Init(String),

    #[error("Decoding failed: {0}")]
    DecodeFailure(String),

    #[error("Encoding failed: {0}")]
    EncodeFailure(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
