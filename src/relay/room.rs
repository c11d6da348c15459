//! Stream rooms and the registry that owns them
//!
//! A room exists while it has a producer or at least one consumer. The
//! registry is the only shared state on the relay; every mutation of one
//! room happens under that room's shard guard, so claiming the producer
//! slot is atomic.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::impairment::{Impairment, Verdict};
use crate::error::RelayError;

/// Identity of one WebSocket connection
pub type ConnectionId = Uuid;

/// Message queued for delivery to a listener
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Bytes),
    Control(String),
}

/// Counters kept per room
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomStats {
    pub frames_in: u64,
    pub bytes_in: u64,
    pub frames_delivered: u64,
    pub dropped_impairment: u64,
    pub dropped_backpressure: u64,
    pub controls_relayed: u64,
}

/// Outcome of fanning one frame out to a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped_impairment: usize,
    pub dropped_backpressure: usize,
    /// Consumers found disconnected and removed
    pub closed: usize,
}

/// Point-in-time view of a room for the API
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub stream_id: u32,
    pub has_producer: bool,
    pub consumers: usize,
    pub created_at: DateTime<Utc>,
    pub stats: RoomStats,
}

struct Consumer {
    tx: mpsc::Sender<Outbound>,
    impairment: Impairment,
}

struct Room {
    producer: Option<ConnectionId>,
    consumers: HashMap<ConnectionId, Consumer>,
    created_at: DateTime<Utc>,
    stats: RoomStats,
}

impl Room {
    fn new() -> Self {
        Self {
            producer: None,
            consumers: HashMap::new(),
            created_at: Utc::now(),
            stats: RoomStats::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.producer.is_none() && self.consumers.is_empty()
    }

    fn summary(&self, stream_id: u32) -> RoomSummary {
        RoomSummary {
            stream_id,
            has_producer: self.producer.is_some(),
            consumers: self.consumers.len(),
            created_at: self.created_at,
            stats: self.stats.clone(),
        }
    }
}

/// All live rooms, keyed by stream id
pub struct RoomRegistry {
    rooms: DashMap<u32, Room>,
    queue_capacity: usize,
}

impl RoomRegistry {
    /// `queue_capacity` bounds each listener's outbound queue, in messages
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Claim the producer slot of a stream, creating the room if needed
    pub fn join_producer(&self, stream_id: u32) -> Result<ConnectionId, RelayError> {
        let mut room = self.rooms.entry(stream_id).or_insert_with(Room::new);
        if room.producer.is_some() {
            return Err(RelayError::ProducerConflict { stream_id });
        }

        let id = Uuid::new_v4();
        room.producer = Some(id);
        info!("Producer {} joined stream {}", id, stream_id);
        Ok(id)
    }

    /// Register a listener; frames for it arrive on the returned receiver
    pub fn join_consumer(
        &self,
        stream_id: u32,
        impairment: Impairment,
    ) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();

        let mut room = self.rooms.entry(stream_id).or_insert_with(Room::new);
        if impairment.is_active() {
            debug!("Consumer {} on stream {} is impaired", id, stream_id);
        }
        room.consumers.insert(id, Consumer { tx, impairment });
        info!(
            "Consumer {} joined stream {} ({} listening)",
            id,
            stream_id,
            room.consumers.len()
        );

        (id, rx)
    }

    /// Fan a frame out to every listener of the stream
    ///
    /// Frames from anything other than the current producer are ignored.
    pub fn relay_frame(&self, stream_id: u32, from: ConnectionId, data: Bytes) -> FanoutReport {
        self.relay_frame_at(stream_id, from, data, Instant::now())
    }

    pub fn relay_frame_at(
        &self,
        stream_id: u32,
        from: ConnectionId,
        data: Bytes,
        now: Instant,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        let Some(mut room) = self.rooms.get_mut(&stream_id) else {
            return report;
        };
        if room.producer != Some(from) {
            return report;
        }

        let room = &mut *room;
        room.stats.frames_in += 1;
        room.stats.bytes_in += data.len() as u64;

        let len = data.len();
        room.consumers.retain(|id, consumer| {
            match consumer.impairment.admit(len, now) {
                Verdict::Deliver => {}
                Verdict::DropRandom | Verdict::DropBitrate => {
                    report.dropped_impairment += 1;
                    return true;
                }
            }

            match consumer.tx.try_send(Outbound::Frame(data.clone())) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    debug!("{} on consumer {}", RelayError::ConsumerBackpressure, id);
                    report.dropped_backpressure += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                    false
                }
            }
        });

        room.stats.frames_delivered += report.delivered as u64;
        room.stats.dropped_impairment += report.dropped_impairment as u64;
        room.stats.dropped_backpressure += report.dropped_backpressure as u64;
        report
    }

    /// Forward a control text to every listener; returns how many got it
    ///
    /// Control messages bypass impairment.
    pub fn relay_control(&self, stream_id: u32, from: ConnectionId, text: &str) -> usize {
        let Some(mut room) = self.rooms.get_mut(&stream_id) else {
            return 0;
        };
        if room.producer != Some(from) {
            return 0;
        }

        let mut sent = 0;
        for (id, consumer) in room.consumers.iter() {
            match consumer.tx.try_send(Outbound::Control(text.to_string())) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Control message to consumer {} not queued: {}", id, e),
            }
        }
        room.stats.controls_relayed += 1;
        sent
    }

    /// Remove a connection from its room, discarding the room once empty
    pub fn leave(&self, stream_id: u32, id: ConnectionId) {
        if let Entry::Occupied(mut entry) = self.rooms.entry(stream_id) {
            let room = entry.get_mut();
            if room.producer == Some(id) {
                room.producer = None;
                info!("Producer {} left stream {}", id, stream_id);
            } else if room.consumers.remove(&id).is_some() {
                info!("Consumer {} left stream {}", id, stream_id);
            }

            if room.is_empty() {
                entry.remove();
                info!("Stream {} room discarded", stream_id);
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn has_producer(&self, stream_id: u32) -> bool {
        self.rooms
            .get(&stream_id)
            .map_or(false, |room| room.producer.is_some())
    }

    pub fn consumer_count(&self, stream_id: u32) -> usize {
        self.rooms
            .get(&stream_id)
            .map_or(0, |room| room.consumers.len())
    }

    pub fn summary(&self, stream_id: u32) -> Result<RoomSummary, RelayError> {
        self.rooms
            .get(&stream_id)
            .map(|room| room.summary(stream_id))
            .ok_or(RelayError::UnknownRoom(stream_id))
    }

    /// Summaries of every room, ordered by stream id
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut all: Vec<_> = self
            .rooms
            .iter()
            .map(|entry| entry.value().summary(*entry.key()))
            .collect();
        all.sort_by_key(|s| s.stream_id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_single_producer_per_stream() {
        let registry = RoomRegistry::new(8);
        let first = registry.join_producer(1).unwrap();

        let err = registry.join_producer(1).unwrap_err();
        assert!(matches!(err, RelayError::ProducerConflict { stream_id: 1 }));

        // Another stream is independent
        assert!(registry.join_producer(2).is_ok());

        registry.leave(1, first);
        assert!(registry.join_producer(1).is_ok());
    }

    #[test]
    fn test_racing_producers_resolve_to_one() {
        use std::sync::{Arc, Barrier};

        let registry = Arc::new(RoomRegistry::new(8));
        for stream_id in 0..50u32 {
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.join_producer(stream_id)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.iter().any(|r| matches!(
                r,
                Err(RelayError::ProducerConflict { stream_id: s }) if *s == stream_id
            )));
            assert!(registry.has_producer(stream_id));
        }
    }

    #[test]
    fn test_fanout_preserves_order_and_bytes() {
        let registry = RoomRegistry::new(32);
        let producer = registry.join_producer(7).unwrap();
        let (_a, mut rx_a) = registry.join_consumer(7, Impairment::none());
        let (_b, mut rx_b) = registry.join_consumer(7, Impairment::none());

        for i in 0..10u8 {
            let report = registry.relay_frame(7, producer, Bytes::from(vec![i; 4]));
            assert_eq!(report.delivered, 2);
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for i in 0..10u8 {
                assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(Bytes::from(vec![i; 4])));
            }
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_frames_from_non_producer_ignored() {
        let registry = RoomRegistry::new(8);
        let _producer = registry.join_producer(1).unwrap();
        let (consumer, mut rx) = registry.join_consumer(1, Impairment::none());

        let report = registry.relay_frame(1, consumer, Bytes::from_static(b"x"));
        assert_eq!(report, FanoutReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_backpressure_drops_for_slow_consumer_only() {
        let registry = RoomRegistry::new(2);
        let producer = registry.join_producer(1).unwrap();
        let (_slow, _rx_slow) = registry.join_consumer(1, Impairment::none());
        let (_fast, mut rx_fast) = registry.join_consumer(1, Impairment::none());

        let mut backpressure = 0;
        for i in 0..5u8 {
            let report = registry.relay_frame(1, producer, Bytes::from(vec![i]));
            backpressure += report.dropped_backpressure;
            while rx_fast.try_recv().is_ok() {}
        }

        assert_eq!(backpressure, 3);
        assert_eq!(registry.summary(1).unwrap().stats.dropped_backpressure, 3);
    }

    #[test]
    fn test_closed_consumer_removed() {
        let registry = RoomRegistry::new(4);
        let producer = registry.join_producer(1).unwrap();
        let (_id, rx) = registry.join_consumer(1, Impairment::none());
        drop(rx);

        let report = registry.relay_frame(1, producer, Bytes::from_static(b"x"));
        assert_eq!(report.closed, 1);
        assert_eq!(registry.consumer_count(1), 0);
    }

    #[test]
    fn test_impairment_is_per_consumer() {
        let registry = RoomRegistry::new(20_000);
        let producer = registry.join_producer(1).unwrap();
        let lossy = Impairment::with_rng(0.3, None, StdRng::seed_from_u64(42));
        let (_a, mut rx_lossy) = registry.join_consumer(1, lossy);
        let (_b, mut rx_clean) = registry.join_consumer(1, Impairment::none());

        for _ in 0..10_000 {
            registry.relay_frame(1, producer, Bytes::from_static(b"frame"));
        }

        let mut lossy_count = 0;
        while rx_lossy.try_recv().is_ok() {
            lossy_count += 1;
        }
        let mut clean_count = 0;
        while rx_clean.try_recv().is_ok() {
            clean_count += 1;
        }

        assert_eq!(clean_count, 10_000);
        let loss = 1.0 - lossy_count as f64 / 10_000.0;
        assert!((loss - 0.3).abs() < 0.05, "loss {}", loss);
    }

    #[test]
    fn test_control_reaches_all_consumers() {
        let registry = RoomRegistry::new(4);
        let producer = registry.join_producer(3).unwrap();
        let dropping = Impairment::with_rng(0.5, Some(1), StdRng::seed_from_u64(1));
        let (_a, mut rx_a) = registry.join_consumer(3, dropping);
        let (_b, mut rx_b) = registry.join_consumer(3, Impairment::none());

        let text = r#"{"type":"stream_ending","countdown":3}"#;
        assert_eq!(registry.relay_control(3, producer, text), 2);
        assert_eq!(rx_a.try_recv().unwrap(), Outbound::Control(text.into()));
        assert_eq!(rx_b.try_recv().unwrap(), Outbound::Control(text.into()));
    }

    #[test]
    fn test_empty_room_discarded() {
        let registry = RoomRegistry::new(4);
        let producer = registry.join_producer(9).unwrap();
        let (consumer, _rx) = registry.join_consumer(9, Impairment::none());
        assert_eq!(registry.room_count(), 1);

        registry.leave(9, producer);
        assert_eq!(registry.room_count(), 1);
        assert!(!registry.has_producer(9));

        registry.leave(9, consumer);
        assert_eq!(registry.room_count(), 0);
        assert!(matches!(registry.summary(9), Err(RelayError::UnknownRoom(9))));
    }
}
