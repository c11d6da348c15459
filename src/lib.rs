//! # Tiercast
//!
//! Live tiered audio over a WebSocket relay: one broadcaster per stream
//! sends every quality tier at once, listeners pick the best tier their
//! link sustains and switch without gaps.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         BROADCASTER          │
//! │  tone ─► encoder per tier    │
//! │  Frame{tier,seq,pts,payload} │
//! └──────────────┬───────────────┘
//!                │ ws binary (protocol::frame) + stream_ending text
//!                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RELAY (relay::server)                 │
//! │  RoomRegistry: stream id ─► { producer slot, consumers }     │
//! │                                                              │
//! │   producer ──► fan-out ──┬─► impairment ─► bounded queue ─┐  │
//! │                          ├─► impairment ─► bounded queue ─┤  │
//! │                          └─► impairment ─► bounded queue ─┤  │
//! └───────────────────────────────────────────────────────────┼──┘
//!                                                             │ ws
//!                                                             ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   LISTENER (playout::session)                │
//! │  decode ─► demux by tier                                     │
//! │            ┌────────┐  ┌────────┐  ┌────────┐                │
//! │            │ Jitter │  │ Jitter │  │ Jitter │  tier 1..3     │
//! │            └───┬────┘  └───┬────┘  └───┬────┘                │
//! │                └───────────┼───────────┘                     │
//! │                            ▼                                 │
//! │              ABR controller picks one tier                   │
//! │                            ▼                                 │
//! │      payload decoder ─► concealment / fades ─► AudioSink     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod abr;
pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod playout;
pub mod protocol;
pub mod relay;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Duration of one frame and one playout control interval
    pub const DEFAULT_FRAME_DURATION_MS: u64 = 20;

    /// Frame intervals scheduled ahead of the output clock
    pub const DEFAULT_LOOKAHEAD_FRAMES: u32 = 10;

    /// Default relay listen port
    pub const DEFAULT_RELAY_PORT: u16 = 8090;

    /// Per-listener outbound queue bound, in messages
    pub const DEFAULT_CONSUMER_QUEUE: usize = 256;
}
