//! Output clock and sink abstractions
//!
//! The playout engine schedules against an [`OutputClock`] and hands
//! finished blocks to an [`AudioSink`]. With the `host-output` feature a cpal
//! stream drains a [`SampleQueue`](super::buffer::SampleQueue) and its played
//! sample count becomes the clock.

use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioBlock, SharedSampleQueue};

/// Monotonic position of the audio output
pub trait OutputClock: Send {
    fn now(&self) -> Duration;
}

/// Receives decoded blocks ahead of their start time
pub trait AudioSink: Send {
    fn schedule(&mut self, block: AudioBlock);

    /// Discard anything scheduled but not yet played
    fn flush(&mut self) {}
}

/// Clock driven by `Instant`, for headless playout
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for WallClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Sink feeding the lock-free queue a host callback drains
pub struct QueueSink {
    queue: SharedSampleQueue,
}

impl QueueSink {
    pub fn new(queue: SharedSampleQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &SharedSampleQueue {
        &self.queue
    }
}

impl AudioSink for QueueSink {
    fn schedule(&mut self, block: AudioBlock) {
        if !self.queue.push(block) {
            tracing::debug!("Output queue full, block dropped");
        }
    }

    fn flush(&mut self) {
        self.queue.clear();
    }
}

impl AudioSink for Vec<AudioBlock> {
    fn schedule(&mut self, block: AudioBlock) {
        self.push(block);
    }

    fn flush(&mut self) {
        self.clear();
    }
}

#[cfg(feature = "host-output")]
pub use host::{HostClock, HostOutput};

#[cfg(feature = "host-output")]
mod host {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::StreamConfig;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::OutputClock;
    use crate::audio::buffer::SharedSampleQueue;
    use crate::error::PlayoutError;

    /// Clock counting sample frames the device has consumed
    #[derive(Clone)]
    pub struct HostClock {
        frames_played: Arc<AtomicU64>,
        sample_rate: u32,
    }

    impl OutputClock for HostClock {
        fn now(&self) -> Duration {
            let frames = self.frames_played.load(Ordering::Relaxed);
            Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate.max(1)))
        }
    }

    /// Default output device draining a sample queue
    pub struct HostOutput {
        running: Arc<AtomicBool>,
        frames_played: Arc<AtomicU64>,
        sample_rate: u32,
        thread_handle: Option<JoinHandle<()>>,
    }

    impl HostOutput {
        pub fn start(
            queue: SharedSampleQueue,
            sample_rate: u32,
            channels: u16,
        ) -> Result<Self, PlayoutError> {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| PlayoutError::OutputDevice("no default output device".into()))?;

            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let running = Arc::new(AtomicBool::new(true));
            let frames_played = Arc::new(AtomicU64::new(0));

            let running_for_loop = running.clone();
            let played = frames_played.clone();

            let handle = thread::Builder::new()
                .name("playout-output".into())
                .spawn(move || {
                    let mut pending: Vec<f32> = Vec::new();
                    let mut pos = 0usize;
                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            for out in data.iter_mut() {
                                if pos >= pending.len() {
                                    match queue.pop() {
                                        Some(block) => {
                                            pending = block.samples;
                                            pos = 0;
                                        }
                                        None => {
                                            *out = 0.0;
                                            continue;
                                        }
                                    }
                                }
                                *out = pending.get(pos).copied().unwrap_or(0.0);
                                pos += 1;
                            }
                            played.fetch_add(
                                (data.len() / channels.max(1) as usize) as u64,
                                Ordering::Relaxed,
                            );
                        },
                        |err| tracing::error!("Output stream error: {}", err),
                        None,
                    );

                    match stream {
                        Ok(stream) => {
                            if let Err(e) = stream.play() {
                                tracing::error!("Failed to start output stream: {}", e);
                                return;
                            }
                            while running_for_loop.load(Ordering::Relaxed) {
                                thread::sleep(Duration::from_millis(10));
                            }
                        }
                        Err(e) => tracing::error!("Failed to build output stream: {}", e),
                    }
                })
                .map_err(|e| PlayoutError::OutputDevice(e.to_string()))?;

            Ok(Self {
                running,
                frames_played,
                sample_rate,
                thread_handle: Some(handle),
            })
        }

        pub fn clock(&self) -> HostClock {
            HostClock {
                frames_played: self.frames_played.clone(),
                sample_rate: self.sample_rate,
            }
        }

        pub fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                if handle.join().is_err() {
                    tracing::warn!("Output thread panicked");
                }
            }
        }
    }

    impl Drop for HostOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
