//! Listener Application
//!
//! Joins a stream on the relay and plays it out. Without the `host-output`
//! feature the output is a headless device that consumes one block per
//! frame interval and reports levels.
//!
//! Usage: `listener [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercast::{
    audio::{create_shared_queue, QueueSink},
    client,
    config::AppConfig,
    playout::{run_playout, PlayoutSession, SessionIngress},
    relay::ConnectParams,
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

    tracing::info!("Starting tiercast listener");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref());
    let client_cfg = config.client.clone();

    let session = PlayoutSession::new(client_cfg.stream_id, config.playout.clone())
        .context("creating playout session")?;
    let ingress = session.ingress();

    let params = ConnectParams::listener(client_cfg.stream_id)
        .with_drop_rate(client_cfg.drop_rate)
        .with_max_kbps(client_cfg.max_kbps);
    let net_ingress = ingress.clone();
    let relay_url = client_cfg.relay_url.clone();
    let network = tokio::spawn(async move {
        match client::listen(&relay_url, &params, net_ingress).await {
            Ok(report) => tracing::info!(
                "Relay connection closed: {} frames, {} control, {} rejected",
                report.frames,
                report.controls,
                report.rejected
            ),
            Err(e) => tracing::error!("Relay connection failed: {}", e),
        }
    });

    let stats_task = tokio::spawn(log_stats(ingress.clone()));

    let ctrl_ingress = ingress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping playout");
            ctrl_ingress.request_stop();
        }
    });

    let queue = create_shared_queue(config.playout.output_queue_blocks);
    let sink = QueueSink::new(queue.clone());

    #[cfg(feature = "host-output")]
    let stats = {
        let mut output = tiercast::audio::playback::HostOutput::start(
            queue,
            config.playout.sample_rate,
            config.playout.channels,
        )?;
        let stats = run_playout(session, output.clock(), sink).await;
        output.stop();
        stats
    };

    #[cfg(not(feature = "host-output"))]
    let stats = {
        let device = tokio::spawn(headless_device(queue, config.playout.frame_interval()));
        let stats = run_playout(session, tiercast::audio::WallClock::new(), sink).await;
        device.abort();
        stats
    };

    ingress.request_stop();
    stats_task.abort();
    match tokio::time::timeout(Duration::from_secs(1), network).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("Relay connection task failed: {}", e),
        Err(_) => tracing::debug!("Relay connection did not close in time"),
    }

    tracing::info!(
        "Session ended: {} blocks ({} real, {} concealed, {} silent), {} tier switches",
        stats.blocks_scheduled,
        stats.blocks_real,
        stats.blocks_concealed,
        stats.blocks_silent,
        stats.tier_switches
    );
    Ok(())
}

async fn log_stats(ingress: SessionIngress) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for (tier, stats) in ingress.tier_stats() {
            tracing::info!(
                "Tier {}: {} received, {} played, {} lost ({:.1}% loss), {} late, depth {}ms",
                tier,
                stats.received,
                stats.played,
                stats.lost,
                stats.loss_rate() * 100.0,
                stats.late,
                stats.depth_ms
            );
        }
    }
}

#[cfg(not(feature = "host-output"))]
async fn headless_device(queue: tiercast::audio::SharedSampleQueue, period: Duration) {
    use tiercast::audio::BlockSource;

    let mut ticker = tokio::time::interval(period);
    let mut played: u64 = 0;
    let mut concealed: u64 = 0;
    let mut peak: f32 = 0.0;

    loop {
        ticker.tick().await;
        let Some(block) = queue.pop() else { continue };

        played += 1;
        if block.source == BlockSource::Concealed {
            concealed += 1;
        }
        peak = block.samples.iter().fold(peak, |p, s| p.max(s.abs()));

        if played % 250 == 0 {
            tracing::info!(
                "Output: {} blocks, {} concealed, peak {:.3}, tier {}",
                played,
                concealed,
                peak,
                block.tier
            );
            peak = 0.0;
        }
    }
}
