use crate::spotify::Observation;
use tokio::sync::mpsc;

/// Closed set of messages the polling loops publish for the supervisor.
/// Each terminal transition ([`AccessTokenFailed`], [`PlaybackPollStopped`])
/// is emitted exactly once by the loop that died.
///
/// [`AccessTokenFailed`]: EngineEvent::AccessTokenFailed
/// [`PlaybackPollStopped`]: EngineEvent::PlaybackPollStopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A new access token was obtained; the supervisor persists it.
    AccessTokenRefreshed { access_token: String },

    /// The refresh ceiling was exceeded; authentication is dead and all
    /// polling should stop.
    AccessTokenFailed,

    /// A fresh playback observation for the automation engine.
    CurrentlyPlaying(Observation),

    /// The track poller self-terminated (sustained silence or errors).
    PlaybackPollStopped,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
