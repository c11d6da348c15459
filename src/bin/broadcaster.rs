//! Broadcaster Application
//!
//! Streams a test tone to the relay on every configured tier. Ctrl-C sends
//! the end-of-stream notice, keeps streaming through the countdown, then
//! disconnects.
//!
//! Usage: `broadcaster [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercast::{
    audio::ToneGenerator,
    client::BroadcastClient,
    codec::{create_encoder, PayloadEncoder},
    config::AppConfig,
    protocol::{ControlMessage, Frame},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tiercast broadcaster");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref());
    let client_cfg = &config.client;
    let playout = &config.playout;

    let frame_size = playout.frame_size();
    let mut encoders: Vec<(u8, Box<dyn PayloadEncoder>)> = Vec::new();
    for profile in &client_cfg.tiers {
        let encoder = create_encoder(
            playout.payload_format,
            playout.sample_rate,
            playout.channels,
            frame_size,
            profile.bitrate,
        )
        .with_context(|| format!("creating encoder for tier {}", profile.tier))?;
        encoders.push((profile.tier, encoder));
        tracing::info!(
            "Tier {}: {:?} at {} kbps",
            profile.tier,
            playout.payload_format,
            profile.bitrate / 1000
        );
    }

    let mut client = BroadcastClient::connect(&client_cfg.relay_url, client_cfg.stream_id)
        .await
        .context("connecting to relay")?;
    tracing::info!(
        "Broadcasting stream {} to {}",
        client_cfg.stream_id,
        client_cfg.relay_url
    );

    let mut tone = ToneGenerator::new(client_cfg.tone_hz, playout.sample_rate, playout.channels);
    let mut ticker = interval(playout.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut sequence: u32 = 1;
    let mut stop_at: Option<Instant> = None;
    let mut last_stats = Instant::now();
    let mut frames_sent: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = &mut ctrl_c, if stop_at.is_none() => {
                result?;
                let countdown = client_cfg.ending_countdown_secs;
                tracing::info!("Ending stream in {} s", countdown);
                client
                    .send_control(&ControlMessage::StreamEnding { countdown })
                    .await?;
                stop_at = Some(Instant::now() + Duration::from_secs(u64::from(countdown)));
                continue;
            }
        }

        if stop_at.is_some_and(|at| Instant::now() >= at) {
            break;
        }

        let samples = tone.next_block(frame_size);
        let pts = u64::from(sequence) * playout.frame_duration_ms;
        for (tier, encoder) in encoders.iter_mut() {
            let payload = match encoder.encode(&samples) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Tier {} encode failed: {}", tier, e);
                    continue;
                }
            };
            let frame = Frame::new(client_cfg.stream_id, *tier, sequence, pts, payload);
            client.send_frame(&frame).await?;
            frames_sent += 1;
        }
        sequence = sequence.wrapping_add(1);

        if last_stats.elapsed() >= Duration::from_secs(5) {
            last_stats = Instant::now();
            tracing::info!("Sent {} frames, sequence {}", frames_sent, sequence);
        }
    }

    client.close().await?;
    tracing::info!("Stream {} ended after {} frames", client_cfg.stream_id, frames_sent);
    Ok(())
}
