//! Record a live card's core event document to disk at a fixed interval.
//!
//! The files feed offline replays of fight-status transitions.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::{info, warn};

use fight_watch::api::{FetchClient, JsonSource, RetryPolicy, event_url, fetch_scoreboard};
use fight_watch::config::{AppConfig, CONFIG_PATH};
use fight_watch::types::parse_api_date;
use fight_watch::watcher::sleep_or_shutdown;

#[derive(Parser)]
#[command(name = "record-event", about = "Record snapshots of the live UFC event")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Seconds between snapshots
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Total recording time in minutes
    #[arg(long)]
    minutes: Option<u64>,

    /// Output directory
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load_or_default(&args.config)?;

    let interval = args.interval_secs.unwrap_or(config.live.recording_interval_secs);
    let minutes = args.minutes.unwrap_or(config.live.recording_minutes);
    let out_dir = args.out.unwrap_or(config.live.recordings_dir.clone());
    if interval == 0 {
        anyhow::bail!("--interval-secs must be positive");
    }

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let client = FetchClient::new(RetryPolicy::from_settings(&config.settings))?;

    info!("Detecting current live event...");
    let board = fetch_scoreboard(&client, None)
        .await
        .context("scoreboard unavailable")?;
    let now = Utc::now();
    let event_id = board
        .events
        .iter()
        .find(|e| {
            parse_api_date(&e.date)
                .is_some_and(|start| start <= now && now <= start + TimeDelta::hours(4))
        })
        .and_then(|e| e.id.clone());
    let Some(event_id) = event_id else {
        anyhow::bail!("No live event currently active");
    };

    info!("Live event detected: {event_id}");
    info!("Recording snapshots every {interval}s for {minutes} min...");

    let url = event_url(&event_id);
    let deadline = Instant::now() + Duration::from_secs(minutes * 60);
    let mut saved = 0usize;

    while Instant::now() < deadline {
        match client.fetch_json(&url).await {
            Some(doc) => {
                let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
                let path = out_dir.join(format!("event-{event_id}-{stamp}.json"));
                let json = serde_json::to_string_pretty(&doc)?;
                match std::fs::write(&path, json) {
                    Ok(()) => {
                        saved += 1;
                        info!("Snapshot saved: {}", path.display());
                    }
                    Err(e) => warn!("Failed to write {}: {e}", path.display()),
                }
            }
            None => warn!("Failed to fetch snapshot for {event_id}"),
        }
        if sleep_or_shutdown(Duration::from_secs(interval)).await {
            break;
        }
    }

    info!("Done. {saved} snapshots saved to {}", out_dir.display());
    Ok(())
}
