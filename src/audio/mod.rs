//! Audio subsystem module

pub mod buffer;
pub mod envelope;
pub mod jitter;
pub mod playback;
pub mod tone;

pub use buffer::{create_shared_queue, AudioBlock, BlockSource, SampleQueue, SharedSampleQueue};
pub use jitter::{create_shared_jitter, JitterBuffer, JitterConfig, JitterStats, Pop, SharedJitterBuffer};
pub use playback::{AudioSink, OutputClock, QueueSink, WallClock};
pub use tone::ToneGenerator;
