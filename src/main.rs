// autoskip - Spotify playback automation daemon
// Polls what you're listening to and applies your seek/skip rules to it

use anyhow::Result;
use autoskip::config::Config;
use autoskip::engine::{
    self, Automation, AutomationEngine, AutomationRange, Automations, Engine, TokenRefresher,
    TokenStore, Tokens, TrackPoller,
};
use autoskip::spotify::{Credentials, SpotifyClient};
use autoskip::store::Store;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autoskip")]
#[command(about = "Automates seeking and skipping on your Spotify playback", version)]
struct Cli {
    /// Use an alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the polling daemon
    Run,
    /// Authorize a Spotify account and store its tokens
    Auth,
    /// Add an automation for a track
    Add {
        /// Spotify track id (the part after /track/ in a share link)
        track_id: String,
        /// Human-readable label, defaults to the track id
        #[arg(long)]
        title: Option<String>,
        /// Seek here when playback is before this position (ms)
        #[arg(long)]
        start_ms: Option<u64>,
        /// Skip to the next track once playback passes this position (ms)
        #[arg(long)]
        end_ms: Option<u64>,
    },
    /// List stored automations
    List,
    /// Remove the automation for a track
    Remove { track_id: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,autoskip=debug"));

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Run => run(config).await,
        Command::Auth => auth(config).await,
        Command::Add {
            track_id,
            title,
            start_ms,
            end_ms,
        } => add(config, track_id, title, start_ms, end_ms),
        Command::List => list(config),
        Command::Remove { track_id } => remove(config, track_id),
    }
}

fn credentials(config: &Config) -> Credentials {
    Credentials {
        client_id: config.spotify.client_id.clone(),
        client_secret: config.spotify.client_secret.clone(),
        redirect_uri: config.spotify.redirect_uri.clone(),
    }
}

async fn run(config: Config) -> Result<()> {
    config.require_credentials()?;

    let store = Store::open(&config.database_path)?;
    let Some(stored) = store.load_tokens()? else {
        anyhow::bail!("no Spotify tokens stored yet; run `autoskip auth` first");
    };

    let automations = Automations::load(store.load_automations()?);
    if automations.is_empty() {
        warn!("no automations configured; playback will only be observed");
    }

    let client = Arc::new(SpotifyClient::new(credentials(&config)));
    let tokens = TokenStore::new(stored);
    let (events, receiver) = engine::events::channel();

    let refresher = TokenRefresher::new(
        client.clone(),
        tokens.clone(),
        events.clone(),
        config.polling.refresher(),
    )
    .spawn();
    let poller = TrackPoller::new(
        client.clone(),
        tokens.clone(),
        events.clone(),
        config.polling.poller(),
    )
    .spawn();
    // the supervisor learns both loops are gone when the channel closes
    drop(events);

    let automation_engine = AutomationEngine::new(client, tokens.clone(), automations);

    Engine::new(receiver, store, tokens, automation_engine, refresher, poller)
        .run()
        .await
}

async fn auth(config: Config) -> Result<()> {
    config.require_credentials()?;

    let store = Store::open(&config.database_path)?;
    let client = SpotifyClient::new(credentials(&config));

    println!("Open this URL in a browser and approve access:\n");
    println!("{}\n", client.authorize_url("autoskip-auth"));
    print!("Paste the `code` query parameter from the redirect URL: ");
    std::io::stdout().flush()?;

    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;
    let code = code.trim();
    anyhow::ensure!(!code.is_empty(), "no authorization code provided");

    let exchanged = client.exchange_code(code).await?;
    let tokens = Tokens {
        access_token: exchanged.access_token,
        refresh_token: exchanged.refresh_token,
        expires_at: Utc::now() + chrono::Duration::seconds(exchanged.expires_in as i64),
    };
    store.save_tokens(&tokens)?;

    println!("Tokens stored. `autoskip run` will keep them fresh from here.");
    Ok(())
}

fn add(
    config: Config,
    track_id: String,
    title: Option<String>,
    start_ms: Option<u64>,
    end_ms: Option<u64>,
) -> Result<()> {
    anyhow::ensure!(
        start_ms.is_some() || end_ms.is_some(),
        "an automation needs at least one of --start-ms / --end-ms"
    );
    if let (Some(start), Some(end)) = (start_ms, end_ms) {
        anyhow::ensure!(start < end, "--start-ms must be below --end-ms");
    }

    let store = Store::open(&config.database_path)?;
    let automation = Automation {
        title: title.unwrap_or_else(|| track_id.clone()),
        track_id,
        range: AutomationRange {
            start: start_ms,
            end: end_ms,
        },
    };
    store.insert_automation(&automation)?;

    println!("Added automation for track {}", automation.track_id);
    Ok(())
}

fn list(config: Config) -> Result<()> {
    let store = Store::open(&config.database_path)?;
    let automations = store.load_automations()?;

    if automations.is_empty() {
        println!("No automations stored.");
        return Ok(());
    }

    for automation in automations {
        let start = automation
            .range
            .start
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let end = automation
            .range
            .end
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  [{} .. {}]  {}",
            automation.track_id, start, end, automation.title
        );
    }

    Ok(())
}

fn remove(config: Config, track_id: String) -> Result<()> {
    let store = Store::open(&config.database_path)?;

    if store.remove_automation(&track_id)? {
        println!("Removed automation for track {track_id}");
    } else {
        println!("No automation stored for track {track_id}");
    }

    Ok(())
}
