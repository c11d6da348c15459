//! Configuration file handling
//!
//! One TOML file covers all three binaries. Every section and field has a
//! default, so an empty or partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::playout::PlayoutConfig;
use crate::relay::RelayConfig;

/// One encoded tier the broadcaster produces
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierProfile {
    pub tier: u8,
    /// Target bitrate for encoded payloads, bits per second
    pub bitrate: u32,
}

/// Broadcaster and listener client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint, without query string
    pub relay_url: String,
    pub stream_id: u32,
    /// Test tone frequency for the broadcaster
    pub tone_hz: f32,
    pub tiers: Vec<TierProfile>,
    /// Seconds announced in the end-of-stream notice
    pub ending_countdown_secs: u32,
    /// Impairment requested by the listener
    pub drop_rate: f64,
    pub max_kbps: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: format!("ws://127.0.0.1:{}/ws", crate::constants::DEFAULT_RELAY_PORT),
            stream_id: 1,
            tone_hz: 440.0,
            tiers: vec![
                TierProfile { tier: 1, bitrate: 32_000 },
                TierProfile { tier: 2, bitrate: 64_000 },
                TierProfile { tier: 3, bitrate: 128_000 },
            ],
            ending_countdown_secs: 3,
            drop_rate: 0.0,
            max_kbps: 0,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub playout: PlayoutConfig,
    pub client: ClientConfig,
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/tiercast/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tiercast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it is missing or bad
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            info!("No config directory available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("Config file {:?} doesn't exist, using defaults", path);
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Failed to load config {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.relay.validate().map_err(Error::Config)?;
        self.playout.validate().map_err(Error::Config)?;

        let client = &self.client;
        if client.tiers.is_empty() {
            return Err(Error::Config("client.tiers must not be empty".into()));
        }
        if let Some(bad) = client.tiers.iter().find(|t| t.tier == 0 || t.bitrate == 0) {
            return Err(Error::Config(format!("invalid tier profile {:?}", bad)));
        }
        if !(client.tone_hz > 0.0) {
            return Err(Error::Config("client.tone_hz must be positive".into()));
        }
        Ok(())
    }
}
