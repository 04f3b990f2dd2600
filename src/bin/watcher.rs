use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use fight_watch::api::{FetchClient, RetryPolicy};
use fight_watch::config::{AppConfig, CONFIG_PATH, RunMode};
use fight_watch::reporter::{self, WebhookNotifier};
use fight_watch::watcher::{SessionEnd, Watcher, sleep_or_shutdown};

#[derive(Parser)]
#[command(name = "fight-watch", about = "UFC card watcher with webhook notifications")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Run a single cycle (or live session) and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env()?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.config.exists() {
        info!("Loaded config from {}", args.config.display());
    } else {
        info!("No config at {}, using defaults", args.config.display());
    }
    if config.settings.poll_interval_secs == 0 {
        anyhow::bail!("settings.poll_interval_secs must be positive");
    }

    let client = FetchClient::new(RetryPolicy::from_settings(&config.settings))?;
    let notifier = WebhookNotifier::new(config.webhook.url.clone())?;
    let watcher = Watcher::new(client, notifier, &config)?;

    match &config.mode {
        RunMode::SimulatedLive {
            event_id,
            event_name,
        } => {
            info!("Simulated live mode for event {event_id}");
            let end = watcher
                .run_simulated_session(event_id, event_name.as_deref())
                .await?;
            info!("Simulation finished: {end:?}");
            return Ok(());
        }
        RunMode::Live => {
            info!("Live mode enabled (refresh {}s)", config.live.refresh_secs);
            loop {
                let end = watcher.run_live_session().await?;
                info!("Live session finished: {end:?}");
                if args.once || end == SessionEnd::Shutdown {
                    return Ok(());
                }
            }
        }
        RunMode::Standard => {}
    }

    let poll_duration = Duration::from_secs(config.settings.poll_interval_secs);
    info!(
        "Watching UFC cards (interval: {}s, data dir: {}). Press Ctrl+C to stop.",
        config.settings.poll_interval_secs,
        config.settings.data_dir.display()
    );

    loop {
        match watcher.run_cycle().await {
            Ok(summary) => reporter::report_cycle_summary(&summary),
            Err(e) => warn!("Cycle error: {e:#}"),
        }
        if args.once || sleep_or_shutdown(poll_duration).await {
            break;
        }
        info!("Scheduled run: fetching UFC fights...");
    }

    Ok(())
}
