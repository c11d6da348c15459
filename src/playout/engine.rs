//! Cooperative playout loop
//!
//! Re-arms once per frame interval and lets the session top the playhead
//! back up to the lookahead horizon. There is no blocking sleep inside a
//! pass; the stopping flag is re-checked by every tick.

use tokio::time::{interval, MissedTickBehavior};

use super::session::{PlayoutSession, SessionStats};
use crate::audio::playback::{AudioSink, OutputClock};

/// Drive a session until its fade completes or a stop is requested
///
/// Returns the counters as they stood just before teardown. The sink is
/// flushed by the session and then dropped, after the buffers are cleared.
pub async fn run_playout<C, S>(mut session: PlayoutSession, clock: C, mut sink: S) -> SessionStats
where
    C: OutputClock,
    S: AudioSink,
{
    let mut ticker = interval(session.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last = session.stats();
    loop {
        ticker.tick().await;

        if session.is_stopping() {
            break;
        }

        let report = session.tick(clock.now(), &mut sink);
        if report.stopped {
            break;
        }
        last = session.stats();
    }

    session.stop(&mut sink);
    drop(sink);
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_queue, SharedSampleQueue};
    use crate::audio::playback::{QueueSink, WallClock};
    use crate::playout::PlayoutConfig;
    use crate::protocol::Frame;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_loop_exits_on_request_stop() {
        let mut config = PlayoutConfig::default();
        config.jitter.preroll_ms = 0;
        config.jitter.min_fill = 1;
        let session = PlayoutSession::new(3, config).unwrap();
        let ingress = session.ingress();

        let queue: SharedSampleQueue = create_shared_queue(64);
        let sink = QueueSink::new(queue.clone());

        let now = Instant::now();
        for seq in 1..=5 {
            ingress
                .ingest_frame(Frame::new(3, 2, seq, u64::from(seq) * 20, vec![0u8; 8]), now)
                .unwrap();
        }

        let handle = tokio::spawn(run_playout(session, WallClock::new(), sink));
        tokio::time::sleep(Duration::from_millis(60)).await;
        ingress.request_stop();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.blocks_scheduled > 0);
        assert!(queue.is_empty());
    }
}
