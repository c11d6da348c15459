//! Relay multiplexer
//!
//! Stream rooms keyed by stream id, one broadcaster each, any number of
//! listeners. The relay never parses audio frames; it forwards opaque
//! binary messages and applies per-listener impairment.

pub mod handlers;
pub mod impairment;
pub mod params;
pub mod room;
pub mod server;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONSUMER_QUEUE, DEFAULT_RELAY_PORT};

pub use impairment::{Impairment, Verdict};
pub use params::{ConnectParams, RawConnectParams, Role};
pub use room::{ConnectionId, FanoutReport, Outbound, RoomRegistry, RoomStats, RoomSummary};
pub use server::RelayServer;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Path of the WebSocket endpoint
    pub ws_path: String,
    /// Per-listener outbound queue bound, in messages
    pub consumer_queue_frames: usize,
    /// Period of the room statistics log line; 0 disables it
    pub stats_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            ws_path: "/ws".to_string(),
            consumer_queue_frames: DEFAULT_CONSUMER_QUEUE,
            stats_interval_secs: 5,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.ws_path.starts_with('/') {
            return Err(format!("ws_path '{}' must start with '/'", self.ws_path));
        }
        if self.consumer_queue_frames == 0 {
            return Err("consumer_queue_frames must be positive".into());
        }
        Ok(())
    }
}
