// Configuration management for autoskip
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::engine::{TokenRefresherConfig, TrackPollerConfig};
use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Intervals and failure ceilings for both polling loops. All of them are
/// settings rather than constants; the defaults match what the loops were
/// tuned for (Spotify access tokens live about an hour).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub token_refresh_secs: u64,
    pub token_retry_secs: u64,
    pub token_error_limit: u32,
    pub playback_interval_ms: u64,
    pub playback_empty_limit: u32,
    pub playback_error_limit: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            token_refresh_secs: 20 * 60,
            token_retry_secs: 60,
            token_error_limit: 3,
            playback_interval_ms: 1000,
            playback_empty_limit: 10,
            playback_error_limit: 3,
        }
    }
}

impl PollingConfig {
    pub fn refresher(&self) -> TokenRefresherConfig {
        TokenRefresherConfig {
            interval: Duration::from_secs(self.token_refresh_secs),
            retry_interval: Duration::from_secs(self.token_retry_secs),
            error_limit: self.token_error_limit,
        }
    }

    pub fn poller(&self) -> TrackPollerConfig {
        TrackPollerConfig {
            interval: Duration::from_millis(self.playback_interval_ms),
            empty_limit: self.playback_empty_limit,
            error_limit: self.playback_error_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autoskip");

        Self {
            database_path: config_dir.join("autoskip.db"),
            spotify: SpotifyConfig {
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: "http://localhost:8888/callback".to_string(),
            },
            polling: PollingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    /// The Spotify app credentials have no usable default; commands that
    /// talk to the API call this first.
    pub fn require_credentials(&self) -> Result<()> {
        anyhow::ensure!(
            !self.spotify.client_id.is_empty() && !self.spotify.client_secret.is_empty(),
            "spotify client_id/client_secret missing; fill them in at {}",
            Self::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".to_string())
        );
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("autoskip");

        Ok(config_dir.join("config.toml"))
    }
}
