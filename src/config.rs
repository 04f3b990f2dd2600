use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
///
/// Every section is optional; environment variables override the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub live: LiveConfig,
    /// Selected from the environment only.
    #[serde(skip)]
    pub mode: RunMode,
    /// `DEBUG_MODE=true` turns on debug logging.
    #[serde(skip)]
    pub debug: bool,
}

/// Chat webhook destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Messages go to the log when unset.
    pub url: Option<String>,
}

/// Standard-cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Seconds between standard cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Events further out than this many months are ignored.
    #[serde(default = "default_horizon_months")]
    pub horizon_months: u32,
    #[serde(default = "default_request_spacing")]
    pub request_spacing_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub event_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub athlete_batch_size: usize,
    /// IANA zone used when printing event times.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Directory holding the state files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_poll_interval() -> u64 {
    3600
}

fn default_horizon_months() -> u32 {
    4
}

fn default_request_spacing() -> u64 {
    50
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_batch_size() -> usize {
    6
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            horizon_months: default_horizon_months(),
            request_spacing_ms: default_request_spacing(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            event_batch_size: default_batch_size(),
            athlete_batch_size: default_batch_size(),
            timezone: default_timezone(),
            data_dir: default_data_dir(),
        }
    }
}

impl SettingsConfig {
    pub fn display_timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

/// Live, simulated-live and recording sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Seconds between scoreboard polls while a card is live.
    #[serde(default = "default_live_refresh")]
    pub refresh_secs: u64,
    /// Upper bound on one live session.
    #[serde(default = "default_session_minutes")]
    pub session_minutes: u64,
    #[serde(default = "default_live_refresh")]
    pub recording_interval_secs: u64,
    #[serde(default = "default_recording_minutes")]
    pub recording_minutes: u64,
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
}

fn default_live_refresh() -> u64 {
    10
}

fn default_session_minutes() -> u64 {
    360
}

fn default_recording_minutes() -> u64 {
    30
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("mock-event-recordings")
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_live_refresh(),
            session_minutes: default_session_minutes(),
            recording_interval_secs: default_live_refresh(),
            recording_minutes: default_recording_minutes(),
            recordings_dir: default_recordings_dir(),
        }
    }
}

/// Which loop the watcher runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Standard,
    Live,
    /// Replay a card as if it were live.
    SimulatedLive {
        event_id: String,
        event_name: Option<String>,
    },
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| var(key).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        if let Some(url) = var("DISCORD_WEBHOOK_URL").filter(|u| !u.trim().is_empty()) {
            self.webhook.url = Some(url);
        }
        if let Some(dir) = var("DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.settings.data_dir = PathBuf::from(dir);
        }
        self.debug = flag("DEBUG_MODE");

        self.mode = if flag("FORCE_SIMULATE_LIVE") {
            let event_id = var("FORCE_EVENT_ID")
                .filter(|id| !id.trim().is_empty())
                .context("FORCE_SIMULATE_LIVE requires FORCE_EVENT_ID")?;
            RunMode::SimulatedLive {
                event_id,
                event_name: var("EVENT_NAME").filter(|n| !n.trim().is_empty()),
            }
        } else if flag("LIVE_MODE") {
            RunMode::Live
        } else {
            RunMode::Standard
        };
        Ok(())
    }
}
