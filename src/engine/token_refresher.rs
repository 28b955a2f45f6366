// Keeps the access token valid without user interaction.
//
// Two-speed cadence: a success reschedules at the normal interval (well
// inside Spotify's one-hour token lifetime), a failure retries on the
// reduced interval until the ceiling is exceeded, at which point the loop
// publishes AccessTokenFailed once and terminates.

use super::events::{EngineEvent, EventSender};
use super::tokens::TokenStore;
use super::LoopHandle;
use crate::spotify::{ApiError, PlayerApi};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TokenRefresherConfig {
    /// Cadence after a successful refresh.
    pub interval: Duration,
    /// Cadence while recovering from transient failures.
    pub retry_interval: Duration,
    /// Consecutive failures tolerated before giving up.
    pub error_limit: u32,
}

impl Default for TokenRefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20 * 60),
            retry_interval: Duration::from_secs(60),
            error_limit: 3,
        }
    }
}

pub struct TokenRefresher<C> {
    client: Arc<C>,
    tokens: TokenStore,
    events: EventSender,
    config: TokenRefresherConfig,
}

impl<C: PlayerApi + 'static> TokenRefresher<C> {
    pub fn new(
        client: Arc<C>,
        tokens: TokenStore,
        events: EventSender,
        config: TokenRefresherConfig,
    ) -> Self {
        Self {
            client,
            tokens,
            events,
            config,
        }
    }

    pub fn spawn(self) -> LoopHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        LoopHandle::new("token-refresher", shutdown_tx, task)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut error_count: u32 = 0;
        // The stored token may already be stale, so refresh right away.
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        debug!("token refresher cancelled");
                        return;
                    }
                }
            }

            let refresh_token = self.tokens.refresh_token();
            let result = tokio::select! {
                result = self.client.refresh_access_token(&refresh_token) => result,
                _ = shutdown.changed() => {
                    debug!("token refresher cancelled mid-request");
                    return;
                }
            };

            match result {
                Ok(refreshed) => {
                    error_count = 0;
                    let expires_at =
                        Utc::now() + chrono::Duration::seconds(refreshed.expires_in as i64);
                    self.tokens.refresh(
                        refreshed.access_token.clone(),
                        expires_at,
                        refreshed.refresh_token,
                    );
                    info!(%expires_at, "access token refreshed");
                    let _ = self.events.send(EngineEvent::AccessTokenRefreshed {
                        access_token: refreshed.access_token,
                    });
                    delay = self.config.interval;
                }
                Err(ApiError::Aborted) => {
                    debug!("token refresh aborted");
                    return;
                }
                Err(api_error) => {
                    error_count += 1;
                    warn!(
                        error = %api_error,
                        consecutive = error_count,
                        "token refresh failed"
                    );
                    if error_count > self.config.error_limit {
                        error!("token refresh ceiling exceeded, authentication is dead");
                        let _ = self.events.send(EngineEvent::AccessTokenFailed);
                        return;
                    }
                    delay = self.config.retry_interval;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events;
    use crate::engine::tokens::Tokens;
    use crate::spotify::{Observation, RefreshedTokens};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted API: pops one refresh result per tick and stamps when the
    /// call happened. An exhausted script aborts, which ends the loop
    /// silently.
    struct ScriptedApi {
        refreshes: Mutex<VecDeque<Result<RefreshedTokens, ApiError>>>,
        stamps: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<RefreshedTokens, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                refreshes: Mutex::new(script.into()),
                stamps: Mutex::new(Vec::new()),
            })
        }

        fn stamps(&self) -> Vec<tokio::time::Instant> {
            self.stamps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlayerApi for ScriptedApi {
        async fn refresh_access_token(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshedTokens, ApiError> {
            self.stamps.lock().unwrap().push(tokio::time::Instant::now());
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ApiError::Aborted))
        }

        async fn currently_playing(
            &self,
            _access_token: &str,
        ) -> Result<Option<Observation>, ApiError> {
            unreachable!("refresher never observes playback")
        }

        async fn seek(&self, _position_ms: u64, _access_token: &str) -> Result<(), ApiError> {
            unreachable!("refresher never seeks")
        }

        async fn next(&self, _access_token: &str) -> Result<(), ApiError> {
            unreachable!("refresher never skips")
        }
    }

    fn request_error() -> Result<RefreshedTokens, ApiError> {
        Err(ApiError::Request {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    fn refreshed(access_token: &str) -> Result<RefreshedTokens, ApiError> {
        Ok(RefreshedTokens {
            access_token: access_token.to_string(),
            expires_in: 3600,
            refresh_token: None,
        })
    }

    fn stored_tokens() -> TokenStore {
        TokenStore::new(Tokens {
            access_token: "stale".to_string(),
            refresh_token: "long-lived".to_string(),
            expires_at: Utc::now(),
        })
    }

    fn refresher(
        api: Arc<ScriptedApi>,
        tokens: TokenStore,
        events: EventSender,
    ) -> TokenRefresher<ScriptedApi> {
        TokenRefresher::new(api, tokens, events, TokenRefresherConfig::default())
    }

    async fn drain(mut rx: events::EventReceiver) -> Vec<EngineEvent> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn success_swaps_token_and_publishes() {
        let (tx, rx) = events::channel();
        let tokens = stored_tokens();
        let api = ScriptedApi::new(vec![refreshed("fresh")]);

        let handle = refresher(api, tokens.clone(), tx).spawn();
        handle.join().await;

        assert_eq!(
            drain(rx).await,
            vec![EngineEvent::AccessTokenRefreshed {
                access_token: "fresh".to_string()
            }]
        );
        assert_eq!(tokens.access_token(), "fresh");
        assert_eq!(tokens.refresh_token(), "long-lived");
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ceiling_and_fails_exactly_once() {
        let (tx, rx) = events::channel();
        let api = ScriptedApi::new(vec![
            request_error(),
            request_error(),
            request_error(),
            request_error(),
        ]);

        let handle = refresher(api, stored_tokens(), tx).spawn();
        handle.join().await;

        // three failures are tolerated on the retry cadence, the fourth kills
        assert_eq!(drain(rx).await, vec![EngineEvent::AccessTokenFailed]);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_error_count() {
        let (tx, rx) = events::channel();
        let api = ScriptedApi::new(vec![
            request_error(),
            request_error(),
            refreshed("recovered"),
            request_error(),
            request_error(),
            request_error(),
            request_error(),
        ]);

        let handle = refresher(api, stored_tokens(), tx).spawn();
        handle.join().await;

        // two early failures do not count against the later streak
        assert_eq!(
            drain(rx).await,
            vec![
                EngineEvent::AccessTokenRefreshed {
                    access_token: "recovered".to_string()
                },
                EngineEvent::AccessTokenFailed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_on_the_reduced_cadence() {
        let (tx, rx) = events::channel();
        let api = ScriptedApi::new(vec![
            request_error(),
            request_error(),
            refreshed("recovered"),
        ]);
        let start = tokio::time::Instant::now();

        let handle = refresher(api.clone(), stored_tokens(), tx).spawn();
        handle.join().await;
        drop(rx);

        // immediate first refresh, 60s retries while degraded, back to the
        // 20-minute cadence after the success (the fourth call is the
        // exhausted script ending the loop)
        let stamps = api.stamps();
        assert_eq!(stamps.len(), 4);
        assert_eq!(stamps[0], start);
        assert_eq!(stamps[1] - stamps[0], Duration::from_secs(60));
        assert_eq!(stamps[2] - stamps[1], Duration::from_secs(60));
        assert_eq!(stamps[3] - stamps[2], Duration::from_secs(20 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_refresh_terminates_silently() {
        let (tx, rx) = events::channel();
        let api = ScriptedApi::new(vec![Err(ApiError::Aborted)]);

        let handle = refresher(api, stored_tokens(), tx).spawn();
        handle.join().await;

        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (tx, rx) = events::channel();
        let api = ScriptedApi::new(vec![refreshed("fresh")]);

        let handle = refresher(api, stored_tokens(), tx).spawn();
        handle.stop();
        handle.stop();
        handle.join().await;

        drop(rx);
    }
}
