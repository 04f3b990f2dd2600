use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SettingsConfig;
use crate::{CORE_ATHLETES_BASE, CORE_EVENTS_BASE, SCOREBOARD_URL};

/// Anything that can answer a GET with a JSON document.
///
/// `None` means "temporarily unavailable"; callers skip or degrade, never abort.
pub trait JsonSource: Sync {
    fn fetch_json(&self, url: &str) -> impl Future<Output = Option<Value>> + Send;
}

/// Spacing and retry budget for upstream requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum gap between the start of two requests, across all callers.
    pub min_spacing: Duration,
    /// Total attempts per URL (not retries after the first).
    pub attempts: u32,
    /// Base backoff; attempt `n` failing waits `base * (n + 1)`, a 429 waits `base * 2`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(50),
            attempts: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SettingsConfig) -> Self {
        Self {
            min_spacing: Duration::from_millis(settings.request_spacing_ms),
            attempts: settings.retry_attempts,
            base_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// Rate-limited HTTP client with a bounded retry budget.
pub struct FetchClient {
    http: reqwest::Client,
    policy: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl FetchClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("fight-watch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            policy,
            last_request: Mutex::new(None),
        })
    }

    /// Wait until `min_spacing` has passed since the previous request started.
    ///
    /// The lock is held while sleeping so concurrent callers queue up.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.policy.min_spacing {
                tokio::time::sleep(self.policy.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl JsonSource for FetchClient {
    async fn fetch_json(&self, url: &str) -> Option<Value> {
        let attempts = self.policy.attempts.max(1);
        let short = short_url(url);

        for attempt in 0..attempts {
            debug!("Attempt {}/{attempts} for {short}", attempt + 1);
            self.throttle().await;

            match self.http.get(url).send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = self.policy.base_delay * 2;
                    info!("Rate limited, waiting {}ms...", wait.as_millis());
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                    Ok(body) => return Some(body),
                    Err(e) => warn!("Attempt {}/{attempts} for {short}: bad JSON: {e}", attempt + 1),
                },
                Ok(resp) => {
                    warn!("Attempt {}/{attempts} for {short}: HTTP {}", attempt + 1, resp.status());
                }
                Err(e) => warn!("Attempt {}/{attempts} for {short}: {e}", attempt + 1),
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.policy.base_delay * (attempt + 1)).await;
            }
        }

        error!("All attempts failed for {short}");
        None
    }
}

/// First 60 characters of a URL, for log lines.
fn short_url(url: &str) -> &str {
    match url.char_indices().nth(60) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

// ── URLs ───────────────────────────────────────────────────────────

/// Scoreboard URL, optionally pinned to one day (`dates=YYYYMMDD`).
pub fn scoreboard_url(day: Option<NaiveDate>) -> String {
    match day {
        Some(d) => format!("{SCOREBOARD_URL}?dates={}", d.format("%Y%m%d")),
        None => SCOREBOARD_URL.to_string(),
    }
}

pub fn event_url(event_id: &str) -> String {
    format!("{CORE_EVENTS_BASE}/{event_id}?lang=en&region=us")
}

pub fn athlete_records_url(athlete_id: &str) -> String {
    format!("{CORE_ATHLETES_BASE}/{athlete_id}/records?lang=en&region=us")
}

/// Ensure `lang` and `region` query parameters on an upstream `$ref`.
pub fn with_locale(reference: &str) -> String {
    let Ok(mut url) = Url::parse(reference) else {
        return reference.to_string();
    };
    let missing: Vec<(&str, &str)> = [("lang", "en"), ("region", "us")]
        .into_iter()
        .filter(|(key, _)| !url.query_pairs().any(|(k, _)| k == *key))
        .collect();
    if !missing.is_empty() {
        url.query_pairs_mut().extend_pairs(missing);
    }
    url.to_string()
}

/// Numeric id following the `events` path segment of a `$ref`.
pub fn event_id_from_ref(reference: &str) -> Option<String> {
    let url = Url::parse(reference).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "events")?;
    let id = segments.next()?;
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then(|| id.to_string())
}

// ── Upstream payloads ──────────────────────────────────────────────

/// Upstream ids arrive as strings, occasionally as numbers.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Deserialize a fetched document, logging instead of failing.
pub fn parse_lenient<T: DeserializeOwned>(value: Value, what: &str) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Malformed {what} document: {e}");
            None
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reference {
    #[serde(rename = "$ref", default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scoreboard {
    pub leagues: Vec<League>,
    pub events: Vec<ScoreboardEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct League {
    /// Entries are objects carrying `event.$ref`; other shapes are ignored.
    pub calendar: Vec<Value>,
}

impl Scoreboard {
    /// Event ids referenced by the league calendar, in calendar order.
    pub fn calendar_event_ids(&self) -> Vec<String> {
        self.leagues
            .first()
            .map(|league| {
                league
                    .calendar
                    .iter()
                    .filter_map(|entry| entry.pointer("/event/$ref")?.as_str())
                    .filter_map(event_id_from_ref)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreboardEvent {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: String,
    pub date: String,
    pub status: Option<Status>,
    pub competitions: Vec<LiveCompetition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Status {
    pub period: Option<u32>,
    pub display_clock: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<StatusType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusType {
    pub state: Option<String>,
    pub name: Option<String>,
    pub completed: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveCompetition {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub status: Option<Status>,
    pub competitors: Vec<LiveCompetitor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveCompetitor {
    pub order: Option<u32>,
    pub winner: Option<bool>,
    pub athlete: Option<InlineAthlete>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InlineAthlete {
    pub display_name: Option<String>,
}

/// Core API event document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventDocument {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    pub date: Option<String>,
    pub competitions: Option<Vec<Value>>,
}

impl EventDocument {
    /// Name, date and a competitions list are all required to use an event.
    pub fn is_complete(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
            && self.date.as_deref().is_some_and(|d| !d.is_empty())
            && self.competitions.is_some()
    }

    /// Competitions that parse; malformed entries are dropped with a warning.
    pub fn competitions(&self) -> Vec<Competition> {
        self.competitions
            .iter()
            .flatten()
            .filter_map(|raw| parse_lenient(raw.clone(), "competition"))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Competition {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<TextField>,
    pub competitors: Vec<Competitor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Competitor {
    pub order: Option<u32>,
    pub athlete: Option<Reference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextField {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Link {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AthleteDocument {
    #[serde(deserialize_with = "lenient_id")]
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    pub citizenship: Option<String>,
    pub weight_class: Option<TextField>,
    pub flag: Option<Link>,
    pub headshot: Option<Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordsDocument {
    pub items: Vec<RecordItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordItem {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub summary: Option<String>,
}

impl RecordsDocument {
    /// The overall win-loss-draw summary, if present.
    pub fn overall(&self) -> Option<String> {
        self.items
            .iter()
            .find(|r| r.name.as_deref() == Some("overall") || r.kind.as_deref() == Some("total"))
            .and_then(|r| r.summary.clone())
    }
}

// ── Fetchers ───────────────────────────────────────────────────────

pub async fn fetch_scoreboard<S: JsonSource>(source: &S, day: Option<NaiveDate>) -> Option<Scoreboard> {
    let body = source.fetch_json(&scoreboard_url(day)).await?;
    let board: Scoreboard = parse_lenient(body, "scoreboard")?;
    debug!(
        "Scoreboard: {} calendar entries, {} events",
        board.leagues.first().map(|l| l.calendar.len()).unwrap_or(0),
        board.events.len()
    );
    Some(board)
}

pub async fn fetch_event<S: JsonSource>(source: &S, event_id: &str) -> Option<EventDocument> {
    let body = source.fetch_json(&event_url(event_id)).await?;
    parse_lenient(body, "event")
}

/// Fetch event documents in fixed-size concurrent batches.
///
/// Unavailable or incomplete events are dropped; order follows `event_ids`.
pub async fn fetch_events<S: JsonSource>(
    source: &S,
    event_ids: &[String],
    batch_size: usize,
) -> Vec<(String, EventDocument)> {
    let mut events = Vec::with_capacity(event_ids.len());
    let mut processed = 0usize;

    for chunk in event_ids.chunks(batch_size.max(1)) {
        let docs = join_all(chunk.iter().map(|id| fetch_event(source, id))).await;
        processed += chunk.len();
        for (id, doc) in chunk.iter().zip(docs) {
            match doc {
                Some(doc) if doc.is_complete() => events.push((id.clone(), doc)),
                Some(_) => debug!("Event {id} is missing name, date or competitions, skipping"),
                None => warn!("Event {id} unavailable, skipping"),
            }
        }
        if event_ids.len() > 20 {
            info!("Events progress: {processed}/{}", event_ids.len());
        }
    }

    debug!("Fetched {} usable events of {}", events.len(), event_ids.len());
    events
}

/// Overall record summary for an athlete id.
pub async fn fetch_athlete_record<S: JsonSource>(source: &S, athlete_id: &str) -> Option<String> {
    let body = source.fetch_json(&athlete_records_url(athlete_id)).await?;
    let records: RecordsDocument = parse_lenient(body, "records")?;
    let overall = records.overall();
    debug!("Record for athlete {athlete_id}: {overall:?}");
    overall
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            min_spacing: Duration::from_millis(1),
            attempts: 2,
            base_delay: Duration::from_millis(5),
        }
    }

    // ── URLs ───────────────────────────────────────────────────────

    #[test]
    fn event_id_from_calendar_ref() {
        let r = "http://sports.core.api.espn.com/v2/sports/mma/leagues/ufc/events/600053545?lang=en&region=us";
        assert_eq!(event_id_from_ref(r).as_deref(), Some("600053545"));
    }

    #[test]
    fn event_id_requires_digits() {
        assert!(event_id_from_ref("http://x.test/leagues/ufc/events/abc").is_none());
        assert!(event_id_from_ref("http://x.test/leagues/ufc/athletes/123").is_none());
        assert!(event_id_from_ref("not a url").is_none());
    }

    #[test]
    fn with_locale_adds_missing_params_only() {
        let added = with_locale("http://x.test/athletes/1");
        assert_eq!(added, "http://x.test/athletes/1?lang=en&region=us");

        let kept = with_locale("http://x.test/athletes/1?lang=en&region=us");
        assert_eq!(kept, "http://x.test/athletes/1?lang=en&region=us");
    }

    #[test]
    fn scoreboard_url_with_day() {
        let day = NaiveDate::from_ymd_opt(2025, 7, 26).unwrap();
        assert!(scoreboard_url(Some(day)).ends_with("?dates=20250726"));
        assert_eq!(scoreboard_url(None), SCOREBOARD_URL);
    }

    // ── Payloads ───────────────────────────────────────────────────

    #[test]
    fn calendar_ids_skip_unusable_entries() {
        let board: Scoreboard = serde_json::from_value(json!({
            "leagues": [{"calendar": [
                {"label": "UFC 1", "event": {"$ref": "http://x.test/leagues/ufc/events/11?lang=en"}},
                "2025-07-26T16:00Z",
                {"label": "no ref"},
                {"event": {"$ref": "http://x.test/leagues/ufc/events/22"}}
            ]}]
        }))
        .unwrap();
        assert_eq!(board.calendar_event_ids(), vec!["11", "22"]);
    }

    #[test]
    fn event_document_completeness() {
        let doc: EventDocument = serde_json::from_value(json!({
            "id": 600053545, "name": "UFC 300", "date": "2025-07-26T16:00Z", "competitions": []
        }))
        .unwrap();
        assert!(doc.is_complete());
        assert_eq!(doc.id.as_deref(), Some("600053545"));

        let missing: EventDocument = serde_json::from_value(json!({"name": "UFC 300"})).unwrap();
        assert!(!missing.is_complete());
    }

    #[test]
    fn malformed_competitions_are_dropped() {
        let doc: EventDocument = serde_json::from_value(json!({
            "name": "UFC 300", "date": "2025-07-26T16:00Z",
            "competitions": [
                {"id": "1", "competitors": [{"athlete": {"$ref": "http://x.test/a/1"}}]},
                {"id": "2", "competitors": "oops"}
            ]
        }))
        .unwrap();
        let comps = doc.competitions();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].id.as_deref(), Some("1"));
    }

    #[test]
    fn overall_record_by_name_or_type() {
        let by_name: RecordsDocument = serde_json::from_value(json!({
            "items": [{"name": "ko", "summary": "5-0"}, {"name": "overall", "summary": "20-3-0"}]
        }))
        .unwrap();
        assert_eq!(by_name.overall().as_deref(), Some("20-3-0"));

        let by_type: RecordsDocument = serde_json::from_value(json!({
            "items": [{"type": "total", "summary": "9-1-0"}]
        }))
        .unwrap();
        assert_eq!(by_type.overall().as_deref(), Some("9-1-0"));
    }

    // ── FetchClient ────────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_returns_json_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(fast_policy()).unwrap();
        let body = client.fetch_json(&format!("{}/doc", server.uri())).await;
        assert_eq!(body, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn fetch_gives_up_after_budget_of_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/event"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(3)
            .expect(2)
            .mount(&server)
            .await;

        let client = FetchClient::new(fast_policy()).unwrap();
        let body = client.fetch_json(&format!("{}/event", server.uri())).await;
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn fetch_retries_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;

        let client = FetchClient::new(fast_policy()).unwrap();
        let body = client.fetch_json(&format!("{}/busy", server.uri())).await;
        assert_eq!(body, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn fetch_treats_bad_json_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(2)
            .mount(&server)
            .await;

        let client = FetchClient::new(fast_policy()).unwrap();
        assert!(client.fetch_json(&format!("{}/html", server.uri())).await.is_none());
    }

    #[tokio::test]
    async fn requests_are_spaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let policy = RetryPolicy {
            min_spacing: Duration::from_millis(40),
            ..fast_policy()
        };
        let client = FetchClient::new(policy).unwrap();
        let url = format!("{}/x", server.uri());

        let start = std::time::Instant::now();
        let _ = join_all((0..3).map(|_| client.fetch_json(&url))).await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
