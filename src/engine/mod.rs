// The polling and automation engine - the part with real temporal behavior.
//
// Two independent loops run on their own timers: the token refresher keeps
// authentication alive, the track poller observes playback. Their output
// flows as typed events into the supervisor, which persists fresh tokens,
// feeds observations to the automation engine, and escalates a dead
// authentication into a full stop.

pub mod automation;
pub mod events;
pub mod token_refresher;
pub mod tokens;
pub mod track_poller;

pub use automation::{Action, Automation, AutomationEngine, AutomationRange, Automations};
pub use events::{EngineEvent, EventReceiver, EventSender};
pub use token_refresher::{TokenRefresher, TokenRefresherConfig};
pub use tokens::{TokenStore, Tokens};
pub use track_poller::{TrackPoller, TrackPollerConfig};

use crate::spotify::PlayerApi;
use crate::store::Store;
use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to one running loop. Owns the loop's shutdown signal; the loop
/// itself owns its timer and counters.
pub struct LoopHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn new(name: &'static str, shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            task,
        }
    }

    /// Asks the loop to stop. Idempotent; calling it on a loop that already
    /// finished on its own is a no-op worth only a debug line.
    pub fn stop(&self) {
        if self.shutdown.send(true).is_err() {
            debug!(name = self.name, "stop requested for a finished loop");
        }
    }

    pub async fn join(self) {
        if let Err(join_error) = self.task.await {
            if !join_error.is_cancelled() {
                error!(name = self.name, error = %join_error, "loop task panicked");
            }
        }
    }
}

enum Outcome {
    Cancelled,
    AuthenticationLost,
    PollingStopped,
}

/// Event-consuming supervisor. Owns the receiving end of the bus, the
/// SQLite store, and the handles of both loops.
pub struct Engine<C> {
    events: EventReceiver,
    store: Store,
    tokens: TokenStore,
    automation: AutomationEngine<C>,
    refresher: LoopHandle,
    poller: LoopHandle,
}

impl<C: PlayerApi> Engine<C> {
    pub fn new(
        events: EventReceiver,
        store: Store,
        tokens: TokenStore,
        automation: AutomationEngine<C>,
        refresher: LoopHandle,
        poller: LoopHandle,
    ) -> Self {
        Self {
            events,
            store,
            tokens,
            automation,
            refresher,
            poller,
        }
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            mut events,
            store,
            tokens,
            automation,
            refresher,
            poller,
        } = self;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let outcome = loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("shutdown requested");
                    break Outcome::Cancelled;
                }
                event = events.recv() => {
                    // both loops gone means there is nothing left to supervise
                    let Some(event) = event else {
                        break Outcome::Cancelled;
                    };
                    match event {
                        EngineEvent::AccessTokenRefreshed { access_token } => {
                            if let Err(error) =
                                store.update_access_token(&access_token, tokens.expires_at())
                            {
                                warn!(%error, "could not persist refreshed access token");
                            }
                        }
                        EngineEvent::CurrentlyPlaying(observed) => {
                            automation.apply(&observed).await;
                        }
                        EngineEvent::AccessTokenFailed => break Outcome::AuthenticationLost,
                        EngineEvent::PlaybackPollStopped => break Outcome::PollingStopped,
                    }
                }
            }
        };

        // A dead refresher has already stopped itself; stop() tolerates that.
        refresher.stop();
        poller.stop();
        refresher.join().await;
        poller.join().await;

        match outcome {
            Outcome::Cancelled => Ok(()),
            Outcome::PollingStopped => {
                info!("playback polling stopped; restart once something is playing again");
                Ok(())
            }
            Outcome::AuthenticationLost => Err(anyhow::anyhow!(
                "Spotify authentication expired; run `autoskip auth` to reconnect"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spotify::{ApiError, Observation, RefreshedTokens};
    use async_trait::async_trait;
    use chrono::Utc;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    enum PlaybackScript {
        /// Every poll observes the same track early in its intro.
        Playing,
        /// Every poll finds nothing playing.
        Empty,
    }

    /// Scripted API for full-wiring runs: refreshes pop off a script (an
    /// exhausted script aborts, ending the refresher silently), playback
    /// follows one fixed behavior, seeks are recorded.
    struct ScriptedApi {
        refreshes: Mutex<VecDeque<Result<RefreshedTokens, ApiError>>>,
        playback: PlaybackScript,
        seeks: Mutex<Vec<u64>>,
    }

    impl ScriptedApi {
        fn new(
            refreshes: Vec<Result<RefreshedTokens, ApiError>>,
            playback: PlaybackScript,
        ) -> Arc<Self> {
            Arc::new(Self {
                refreshes: Mutex::new(refreshes.into()),
                playback,
                seeks: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PlayerApi for ScriptedApi {
        async fn refresh_access_token(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshedTokens, ApiError> {
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
            match self.playback {
                PlaybackScript::Playing => Ok(Some(Observation {
                    track_id: "T1".to_string(),
                    title: "some song".to_string(),
                    progress_ms: 2000,
                    duration_ms: 180_000,
                })),
                PlaybackScript::Empty => Ok(None),
            }
        }

        async fn seek(&self, position_ms: u64, _access_token: &str) -> Result<(), ApiError> {
            self.seeks.lock().unwrap().push(position_ms);
            Ok(())
        }

        async fn next(&self, _access_token: &str) -> Result<(), ApiError> {
            unreachable!("these runs never pass an end bound")
        }
    }

    fn request_error() -> Result<RefreshedTokens, ApiError> {
        Err(ApiError::Request {
            status: StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    fn stored_tokens() -> Tokens {
        Tokens {
            access_token: "stale".to_string(),
            refresh_token: "long-lived".to_string(),
            expires_at: Utc::now(),
        }
    }

    /// Wires store, loops, and supervisor the way the `run` command does.
    fn engine(
        api: Arc<ScriptedApi>,
        db_path: &PathBuf,
        automations: Automations,
    ) -> Engine<ScriptedApi> {
        let store = Store::open(db_path).unwrap();
        store.save_tokens(&stored_tokens()).unwrap();

        let tokens = TokenStore::new(store.load_tokens().unwrap().unwrap());
        let (sender, receiver) = events::channel();

        let refresher = TokenRefresher::new(
            api.clone(),
            tokens.clone(),
            sender.clone(),
            TokenRefresherConfig::default(),
        )
        .spawn();
        let poller = TrackPoller::new(
            api.clone(),
            tokens.clone(),
            sender.clone(),
            TrackPollerConfig::default(),
        )
        .spawn();
        drop(sender);

        let automation = AutomationEngine::new(api, tokens.clone(), automations);
        Engine::new(receiver, store, tokens, automation, refresher, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn lost_authentication_stops_polling_and_errors() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("autoskip.db");
        // playback stays busy so only the dead refresher can end the run
        let api = ScriptedApi::new(
            vec![
                request_error(),
                request_error(),
                request_error(),
                request_error(),
            ],
            PlaybackScript::Playing,
        );
        let automations = Automations::load(vec![Automation {
            track_id: "T1".to_string(),
            title: "some song".to_string(),
            range: AutomationRange {
                start: Some(5000),
                end: None,
            },
        }]);

        let result = engine(api.clone(), &db_path, automations).run().await;

        let run_error = result.unwrap_err();
        assert!(run_error.to_string().contains("autoskip auth"));
        // observations kept flowing through the supervisor until the end
        assert!(!api.seeks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stop_exits_cleanly_and_the_refreshed_token_is_persisted() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("autoskip.db");
        let api = ScriptedApi::new(
            vec![Ok(RefreshedTokens {
                access_token: "fresh".to_string(),
                expires_in: 3600,
                refresh_token: None,
            })],
            PlaybackScript::Empty,
        );

        let result = engine(api, &db_path, Automations::default()).run().await;
        assert!(result.is_ok());

        // reopen: the supervisor persisted the refreshed access token and
        // left the refresh token alone
        let store = Store::open(&db_path).unwrap();
        let loaded = store.load_tokens().unwrap().unwrap();
        assert_eq!(loaded.access_token, "fresh");
        assert_eq!(loaded.refresh_token, "long-lived");
    }
}
