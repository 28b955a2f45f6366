// Spotify Web API integration - token refresh, playback observation, playback control

pub mod api;
pub mod error;

pub use api::{Credentials, SpotifyClient};
pub use error::ApiError;

use async_trait::async_trait;
use serde::Deserialize;

/// Snapshot of whatever the player reported as currently playing.
/// Superseded by the next poll cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub track_id: String,
    pub title: String,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

/// Payload of a successful token refresh. Spotify occasionally rotates the
/// refresh token too, so that field is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Full token pair handed back by the authorization-code exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Everything the engine asks of the Spotify Web API.
///
/// The real client lives in [`api`]; the polling loops and the automation
/// engine only see this trait, so tests drive them with scripted fakes.
#[async_trait]
pub trait PlayerApi: Send + Sync {
    async fn refresh_access_token(&self, refresh_token: &str)
        -> Result<RefreshedTokens, ApiError>;

    /// `Ok(None)` means nothing is playing (HTTP 204, or a body with no
    /// usable track item). That is a normal idle condition, not a failure.
    async fn currently_playing(&self, access_token: &str)
        -> Result<Option<Observation>, ApiError>;

    async fn seek(&self, position_ms: u64, access_token: &str) -> Result<(), ApiError>;

    async fn next(&self, access_token: &str) -> Result<(), ApiError>;
}
