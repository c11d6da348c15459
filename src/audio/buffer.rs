//! Lock-free queue of pre-decoded audio blocks
//!
//! The playout engine decodes ahead of the host clock and pushes finished
//! blocks here; the host audio callback only ever pops ready samples.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where a block's samples came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// Decoded from a frame that arrived in time
    Frame,
    /// Last real frame repeated under a fade
    Concealed,
    /// Nothing to play
    Silence,
}

/// One frame interval of interleaved samples scheduled on the output clock
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Interleaved samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Output-clock time at which the block starts
    pub start: Duration,
    /// Tier the block was served from
    pub tier: u8,
    pub source: BlockSource,
}

impl AudioBlock {
    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Lock-free queue between the playout engine and the host callback
pub struct SampleQueue {
    queue: ArrayQueue<AudioBlock>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleQueue {
    /// Create a new queue with the specified capacity in blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a block. Returns false if the queue is full (overflow)
    pub fn push(&self, block: AudioBlock) -> bool {
        match self.queue.push(block) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a block. Returns None if the queue is empty (underrun)
    pub fn pop(&self) -> Option<AudioBlock> {
        match self.queue.pop() {
            Some(block) => Some(block),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Drop every queued block
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample queue
pub type SharedSampleQueue = Arc<SampleQueue>;

/// Create a new shared sample queue
pub fn create_shared_queue(capacity: usize) -> SharedSampleQueue {
    Arc::new(SampleQueue::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start_ms: u64) -> AudioBlock {
        AudioBlock {
            samples: vec![0.0; 960],
            channels: 2,
            start: Duration::from_millis(start_ms),
            tier: 1,
            source: BlockSource::Frame,
        }
    }

    #[test]
    fn test_queue_order_and_overflow() {
        let queue = SampleQueue::new(2);

        assert!(queue.push(block(0)));
        assert!(queue.push(block(20)));
        assert!(!queue.push(block(40)));
        assert_eq!(queue.overflow_count(), 1);

        assert_eq!(queue.pop().unwrap().start, Duration::ZERO);
        assert_eq!(queue.pop().unwrap().samples_per_channel(), 480);
        assert!(queue.pop().is_none());
        assert_eq!(queue.underrun_count(), 1);
    }

    #[test]
    fn test_clear() {
        let queue = SampleQueue::new(4);
        queue.push(block(0));
        queue.push(block(20));
        queue.clear();
        assert!(queue.is_empty());
    }
}
