// Rule matching and action dispatch.
//
// An automation binds a track id to a progress range. While the track plays,
// a position before the start bound gets seeked forward; a position past the
// end bound skips to the next track. Inside the range (or with the bound
// absent) nothing happens. Comparisons are strict, so a position sitting
// exactly on a bound takes no action and cannot seek in a tight loop.

use super::tokens::TokenStore;
use crate::spotify::{ApiError, Observation, PlayerApi};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress bounds in milliseconds, each side independently optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutomationRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Automation {
    pub track_id: String,
    pub title: String,
    pub range: AutomationRange,
}

/// The automation set, keyed by track id. Loaded once per process lifetime;
/// read-only from then on.
#[derive(Debug, Default)]
pub struct Automations {
    by_track: HashMap<String, Automation>,
}

/// What a single observation translates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Seek(u64),
    Next,
}

impl Automations {
    /// Builds the lookup map, enforcing track-id uniqueness: the first
    /// automation for a track wins and later duplicates are dropped loudly.
    pub fn load(automations: Vec<Automation>) -> Self {
        let mut by_track = HashMap::with_capacity(automations.len());
        for automation in automations {
            if by_track.contains_key(&automation.track_id) {
                warn!(
                    track_id = %automation.track_id,
                    "duplicate automation ignored, first one wins"
                );
                continue;
            }
            by_track.insert(automation.track_id.clone(), automation);
        }
        Self { by_track }
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_track.len()
    }

    /// Zero or one action for an observation. A seek supersedes any skip
    /// decision in the same cycle; the next poll re-evaluates against the
    /// corrected position.
    pub fn decide(&self, observed: &Observation) -> Option<Action> {
        let automation = self.by_track.get(&observed.track_id)?;

        if let Some(start) = automation.range.start {
            if observed.progress_ms < start {
                return Some(Action::Seek(start));
            }
        }

        if let Some(end) = automation.range.end {
            if observed.progress_ms > end {
                return Some(Action::Next);
            }
        }

        None
    }
}

pub struct AutomationEngine<C> {
    client: Arc<C>,
    tokens: TokenStore,
    automations: Automations,
}

impl<C: PlayerApi> AutomationEngine<C> {
    pub fn new(client: Arc<C>, tokens: TokenStore, automations: Automations) -> Self {
        Self {
            client,
            tokens,
            automations,
        }
    }

    /// Applies the matching automation, if any. Action failures are logged
    /// here and never reach the poller - a failed seek must not stop
    /// playback observation.
    pub async fn apply(&self, observed: &Observation) {
        let Some(action) = self.automations.decide(observed) else {
            return;
        };

        let access_token = self.tokens.access_token();
        let result = match action {
            Action::Seek(position_ms) => {
                debug!(track_id = %observed.track_id, position_ms, "seeking");
                self.client.seek(position_ms, &access_token).await
            }
            Action::Next => {
                debug!(track_id = %observed.track_id, "skipping to next track");
                self.client.next(&access_token).await
            }
        };

        match result {
            Ok(()) => {}
            Err(ApiError::Aborted) => {
                debug!(track_id = %observed.track_id, "automation action aborted")
            }
            Err(api_error) => warn!(
                track_id = %observed.track_id,
                error = %api_error,
                "automation action failed"
            ),
        }
    }
}
