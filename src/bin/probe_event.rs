//! Probe: normalize one event and show its new-fights notification.
//!
//! Fetches the core event document, resolves every athlete (record, flag,
//! nickname) and prints the formatted message, or posts it to the webhook
//! with a test prefix when `--send` is given.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use fight_watch::api::{FetchClient, RetryPolicy, fetch_event};
use fight_watch::config::{AppConfig, CONFIG_PATH};
use fight_watch::normalize::{AthleteCache, normalize_event};
use fight_watch::reporter::{self, Notifier, WebhookNotifier};

#[derive(Parser)]
#[command(name = "probe-event", about = "Format one UFC event as a notification")]
struct Args {
    /// Core API event id
    event_id: String,

    /// Post to the configured webhook instead of printing
    #[arg(long)]
    send: bool,

    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
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
    if !args.event_id.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("EVENT_ID must be numeric, got {:?}", args.event_id);
    }

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env()?;
    let tz = config.settings.display_timezone()?;
    let client = FetchClient::new(RetryPolicy::from_settings(&config.settings))?;

    println!("=== Probe: event {} ===", args.event_id);
    let start = Instant::now();
    let doc = fetch_event(&client, &args.event_id)
        .await
        .with_context(|| format!("event {} unavailable", args.event_id))?;
    if !doc.is_complete() {
        anyhow::bail!("event {} is missing name, date or competitions", args.event_id);
    }

    let mut cache = AthleteCache::new();
    let event = normalize_event(
        &client,
        &mut cache,
        &args.event_id,
        &doc,
        config.settings.athlete_batch_size,
    )
    .await
    .context("event could not be normalized")?;

    println!("Event: {} ({} fights)", event.name, event.fights.len());
    println!("Athletes resolved: {} in {:?}", cache.len(), start.elapsed());
    let unannounced = event.fights.iter().filter(|f| !f.announced).count();
    println!("Unannounced fights: {unannounced}");
    println!();

    let message = reporter::new_fights_message(&event.name, event.date, &event.fights, tz);
    if args.send {
        if config.webhook.url.is_none() {
            anyhow::bail!("--send requires a webhook URL (DISCORD_WEBHOOK_URL or [webhook].url)");
        }
        let notifier = WebhookNotifier::new(config.webhook.url.clone())?;
        notifier.send(&format!("🧪 TEST\n\n{message}")).await;
        println!("Sent {} chars to webhook", message.chars().count());
    } else {
        println!("{}", reporter::truncate_content(&message));
    }

    Ok(())
}
