// autoskip library - keeps one Spotify account's playback in line with
// user-defined automations ("when this track plays, seek past the intro,
// skip once the outro starts")

pub mod config;  // settings, intervals, credentials
pub mod engine;  // token refresher, track poller, automation engine
pub mod spotify; // Spotify Web API client and error taxonomy
pub mod store;   // SQLite persistence for tokens and automations

// Export the stuff other modules actually use
pub use config::Config;
pub use engine::{Automation, AutomationRange, Automations, Engine, TokenStore, Tokens};
pub use spotify::{ApiError, Observation, PlayerApi, SpotifyClient};
pub use store::Store;
