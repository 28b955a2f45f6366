// The real Web API client. Three endpoint families:
//   accounts.spotify.com - authorization-code exchange and token refresh
//   /v1/me/player/*      - currently-playing observation, seek, next

use super::{ApiError, Observation, PlayerApi, RefreshedTokens, TokenExchange};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Scopes needed to observe playback and issue seek/skip commands.
const SCOPES: &str =
    "user-read-currently-playing user-read-playback-state user-modify-playback-state";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub struct SpotifyClient {
    http: Client,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingBody {
    progress_ms: Option<u64>,
    item: Option<TrackItem>,
}

// Ads and some podcast episodes come back without a usable item; those
// observations count as "nothing playing".
#[derive(Debug, Deserialize)]
struct TrackItem {
    id: String,
    name: String,
    duration_ms: u64,
}

impl SpotifyClient {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            http: Client::new(),
            credentials,
        }
    }

    /// User-consent URL for the one-time authorization step.
    pub fn authorize_url(&self, state: &str) -> String {
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.credentials.client_id.as_str()),
                ("scope", SCOPES),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("state", state),
            ],
        )
        .expect("authorize URL is statically valid");

        url.to_string()
    }

    /// Trade the redirect `code` for a full token pair. Only used by the
    /// `auth` bootstrap; after that, refreshes keep the account alive.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchange, ApiError> {
        let request = self
            .http
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ]);

        let response = self.send(request).await?;
        response.json().await.map_err(ApiError::ResponseSchema)
    }

    /// Fire a request and classify what came back. Success here only means
    /// an HTTP-level success; body parsing is the caller's business.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ApiError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Request { status });
        }

        Ok(response)
    }
}

#[async_trait]
impl PlayerApi for SpotifyClient {
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, ApiError> {
        let request = self
            .http
            .post(TOKEN_URL)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ]);

        let response = self.send(request).await?;
        response.json().await.map_err(ApiError::ResponseSchema)
    }

    async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<Observation>, ApiError> {
        let request = self
            .http
            .get(format!("{API_BASE}/me/player/currently-playing"))
            .bearer_auth(access_token);

        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body: CurrentlyPlayingBody =
            response.json().await.map_err(ApiError::ResponseSchema)?;

        let (Some(progress_ms), Some(item)) = (body.progress_ms, body.item) else {
            return Ok(None);
        };

        Ok(Some(Observation {
            track_id: item.id,
            title: item.name,
            progress_ms,
            duration_ms: item.duration_ms,
        }))
    }

    async fn seek(&self, position_ms: u64, access_token: &str) -> Result<(), ApiError> {
        let request = self
            .http
            .put(format!("{API_BASE}/me/player/seek"))
            .query(&[("position_ms", position_ms)])
            .bearer_auth(access_token);

        self.send(request).await?;
        Ok(())
    }

    async fn next(&self, access_token: &str) -> Result<(), ApiError> {
        let request = self
            .http
            .post(format!("{API_BASE}/me/player/next"))
            .bearer_auth(access_token);

        self.send(request).await?;
        Ok(())
    }
}
