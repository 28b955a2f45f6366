// Observes what is currently playing, once a second.
//
// Two independent ceilings: "nothing playing" is a normal idle condition
// (the user paused) and gets a generous allowance, while repeated API errors
// point at token or network trouble and get a short one. Either ceiling
// publishes PlaybackPollStopped once and terminates the loop.

use super::events::{EngineEvent, EventSender};
use super::tokens::TokenStore;
use super::LoopHandle;
use crate::spotify::{ApiError, PlayerApi};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct TrackPollerConfig {
    pub interval: Duration,
    /// Consecutive empty observations tolerated before self-terminating.
    pub empty_limit: u32,
    /// Consecutive API errors tolerated before self-terminating.
    pub error_limit: u32,
}

impl Default for TrackPollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            empty_limit: 10,
            error_limit: 3,
        }
    }
}

pub struct TrackPoller<C> {
    client: Arc<C>,
    tokens: TokenStore,
    events: EventSender,
    config: TrackPollerConfig,
}

impl<C: PlayerApi + 'static> TrackPoller<C> {
    pub fn new(
        client: Arc<C>,
        tokens: TokenStore,
        events: EventSender,
        config: TrackPollerConfig,
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
        LoopHandle::new("track-poller", shutdown_tx, task)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut empty_count: u32 = 0;
        let mut error_count: u32 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.changed() => {
                    debug!("track poller cancelled");
                    return;
                }
            }

            // Always the token that is current right now, never a captured one.
            let access_token = self.tokens.access_token();
            let result = tokio::select! {
                result = self.client.currently_playing(&access_token) => result,
                _ = shutdown.changed() => {
                    debug!("track poller cancelled mid-request");
                    return;
                }
            };

            match result {
                Ok(Some(observed)) => {
                    empty_count = 0;
                    error_count = 0;
                    trace!(
                        track_id = %observed.track_id,
                        progress_ms = observed.progress_ms,
                        "observed playback"
                    );
                    let _ = self.events.send(EngineEvent::CurrentlyPlaying(observed));
                }
                Ok(None) => {
                    empty_count += 1;
                    if empty_count > self.config.empty_limit {
                        info!(
                            checks = empty_count,
                            "nothing playing for a while, stopping playback polling"
                        );
                        let _ = self.events.send(EngineEvent::PlaybackPollStopped);
                        return;
                    }
                }
                Err(ApiError::Aborted) => {
                    debug!("currently-playing request aborted");
                    return;
                }
                Err(api_error) => {
                    error_count += 1;
                    warn!(
                        error = %api_error,
                        consecutive = error_count,
                        "currently-playing poll failed"
                    );
                    if error_count > self.config.error_limit {
                        warn!("playback poll error ceiling exceeded, stopping");
                        let _ = self.events.send(EngineEvent::PlaybackPollStopped);
                        return;
                    }
                }
            }
        }
    }
}
