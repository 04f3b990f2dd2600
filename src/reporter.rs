use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::types::{Athlete, CycleSummary, EventChanges, Fight, RemovedFight};

/// Webhook messages are cut at this many characters.
pub const MAX_CONTENT_CHARS: usize = 1900;
const TRUNCATION_MARKER: &str = "\n\n*...truncated*";

/// Destination for human-readable notifications.
///
/// Delivery is best effort: implementations log failures and never return them.
pub trait Notifier: Sync {
    fn send(&self, content: &str) -> impl Future<Output = ()> + Send;
}

/// Posts `{"content": ...}` to a chat webhook, or prints when no URL is set.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build webhook client")?;
        if url.is_none() {
            warn!("No webhook URL configured, notifications go to the log");
        }
        Ok(Self { http, url })
    }
}

impl Notifier for WebhookNotifier {
    async fn send(&self, content: &str) {
        let content = truncate_content(content);
        let Some(url) = &self.url else {
            info!("Notification (no webhook):\n{content}");
            return;
        };
        match self.http.post(url).json(&json!({ "content": content })).send().await {
            Ok(resp) if resp.status().is_success() => debug!("Webhook delivered ({} chars)", content.chars().count()),
            Ok(resp) => error!("Webhook rejected message: HTTP {}", resp.status()),
            Err(e) => error!("Webhook message failed: {e}"),
        }
    }
}

/// Cap content at [`MAX_CONTENT_CHARS`] characters, marking the cut.
pub fn truncate_content(content: &str) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &content[..idx]),
        None => content.to_string(),
    }
}

/// `"Saturday, July 26, 2025 at 9:00 AM PDT"` in the display timezone.
pub fn format_event_datetime(date: DateTime<Utc>, tz: Tz) -> String {
    let local = date.with_timezone(&tz);
    format!("{} at {}", local.format("%A, %B %-d, %Y"), local.format("%-I:%M %p %Z"))
}

fn format_athlete(athlete: &Athlete) -> String {
    let mut out = format!("**{}**", athlete.display_name);
    if let Some(flag) = &athlete.country_flag {
        out.push(' ');
        out.push_str(flag);
    }
    if let Some(nickname) = &athlete.nickname {
        out.push_str(&format!(" \"{nickname}\""));
    }
    if let Some(record) = &athlete.record {
        out.push_str(&format!(" ({record})"));
    }
    out
}

/// One fight line: both fighters with flag, nickname and record, then division.
pub fn format_fight_line(fight: &Fight) -> String {
    let [first, second, ..] = fight.athletes.as_slice() else {
        return fight.fight_name();
    };
    let mut line = format!("{} vs {}", format_athlete(first), format_athlete(second));
    let division = fight
        .weight_class
        .as_ref()
        .or(first.weight_class.as_ref())
        .or(second.weight_class.as_ref());
    if let Some(division) = division {
        line.push_str(&format!(" ({division})"));
    }
    line
}

fn numbered<I>(lines: I) -> String
where
    I: IntoIterator<Item = String>,
{
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| format!("**{}.** {line}\n\n", i + 1))
        .collect()
}

fn event_header(icon: &str, event_name: &str, date: DateTime<Utc>, tz: Tz, title: &str) -> String {
    format!(
        "{icon} **{event_name}**\n\n📅 **{}**\n\n{title}\n\n",
        format_event_datetime(date, tz)
    )
}

// ── Standard cycle messages ────────────────────────────────────────

pub fn new_fights_message(event_name: &str, date: DateTime<Utc>, fights: &[Fight], tz: Tz) -> String {
    let mut content = event_header("🚨", event_name, date, tz, "🥊 **New fights added:**");
    content.push_str(&numbered(fights.iter().map(format_fight_line)));
    content
}

pub fn updated_fights_message(
    event_name: &str,
    date: DateTime<Utc>,
    fights: &[Fight],
    tz: Tz,
) -> String {
    let mut content = event_header("🔄", event_name, date, tz, "⬆️ **Updated fights:**");
    content.push_str(&numbered(fights.iter().map(format_fight_line)));
    content
}

pub fn changes_message(event_name: &str, changes: &EventChanges, tz: Tz) -> String {
    let mut content = event_header(
        "⚠️",
        event_name,
        changes.event_date,
        tz,
        "🔄 **Fight changes detected:**",
    );
    content.push_str(&numbered(changes.changes.iter().cloned()));
    content
}

pub fn removed_message(removed: &[RemovedFight]) -> String {
    let mut content = String::from("❌ **Fights Removed**\n\n");
    content.push_str(&numbered(
        removed.iter().map(|r| format!("{}: {}", r.event_name, r.fight_name)),
    ));
    content
}

pub fn start_message(now: DateTime<Utc>, tz: Tz) -> String {
    format!("👀 Running UFC fight watcher at {}", format_event_datetime(now, tz))
}

pub fn no_changes_message() -> String {
    "✅ UFC watcher ran: no changes detected.".to_string()
}

pub fn completion_message(summary: &CycleSummary) -> String {
    format!(
        "✅ UFC watcher completed in {:.2}s - Cache: {} fighters, {} changes, {} removals",
        summary.elapsed_secs, summary.cached_athletes, summary.changes, summary.removals
    )
}

pub fn failure_message(err: &anyhow::Error) -> String {
    format!("❌ UFC watcher failed: {err:#}")
}

// ── Live messages ──────────────────────────────────────────────────

pub fn live_start_message(event_name: &str, fight_count: usize, refresh_secs: u64) -> String {
    format!(
        "🔴 **LIVE EVENT STARTING!**\n\n🥊 **{event_name}**\n\n🤖 Switching to live mode - updates every {refresh_secs} seconds!\n\n📊 Monitoring {fight_count} fights"
    )
}

pub fn live_end_message(event_name: &str) -> String {
    format!(
        "🏁 **LIVE EVENT ENDED**\n\n✅ **{event_name}** has concluded\n\n🤖 Returning to normal monitoring"
    )
}

pub fn upcoming_message(event_name: &str, minutes_until: i64) -> String {
    format!(
        "⏰ **UPCOMING EVENT**\n\n🥊 **{event_name}**\n\n📅 Starting in {minutes_until} minutes\n\n🤖 Increased monitoring frequency"
    )
}

pub fn live_update_message(event_name: &str, update: &str) -> String {
    format!("🔴 **LIVE UPDATE** - {event_name}\n\n{update}")
}

/// Emit the cycle summary as pretty-printed JSON to stdout.
pub fn report_cycle_summary(summary: &CycleSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 26, 16, 0, 0).unwrap()
    }

    fn la() -> Tz {
        chrono_tz::America::Los_Angeles
    }

    fn athlete(name: &str) -> Athlete {
        Athlete {
            country_flag: Some("🇧🇷".into()),
            nickname: Some("do Bronx".into()),
            record: Some("34-10-0".into()),
            weight_class: Some("Lightweight".into()),
            ..Athlete::named(name)
        }
    }

    fn fight(athletes: Vec<Athlete>, weight_class: Option<&str>) -> Fight {
        Fight {
            fight_id: "f1".into(),
            event_id: "E1".into(),
            event_name: "UFC 300".into(),
            event_date: date(),
            athletes,
            weight_class: weight_class.map(String::from),
            announced: true,
        }
    }

    // ── formatting ─────────────────────────────────────────────────

    #[test]
    fn event_datetime_in_pacific() {
        assert_eq!(
            format_event_datetime(date(), la()),
            "Saturday, July 26, 2025 at 9:00 AM PDT"
        );
        let winter = Utc.with_ymd_and_hms(2025, 1, 18, 3, 5, 0).unwrap();
        assert_eq!(
            format_event_datetime(winter, la()),
            "Friday, January 17, 2025 at 7:05 PM PST"
        );
    }

    #[test]
    fn fight_line_full_profile() {
        let f = fight(vec![athlete("Charles Oliveira"), Athlete::named("Justin Gaethje")], None);
        assert_eq!(
            format_fight_line(&f),
            "**Charles Oliveira** 🇧🇷 \"do Bronx\" (34-10-0) vs **Justin Gaethje** (Lightweight)"
        );
    }

    #[test]
    fn fight_line_prefers_competition_weight_class() {
        let f = fight(
            vec![athlete("A"), athlete("B")],
            Some("Women's Strawweight"),
        );
        assert!(format_fight_line(&f).ends_with("(Women's Strawweight)"));
    }

    #[test]
    fn fight_line_with_one_athlete_uses_name() {
        let f = fight(vec![Athlete::named("Solo")], None);
        assert_eq!(format_fight_line(&f), "Solo");
    }

    #[test]
    fn new_fights_message_numbers_lines() {
        let fights = vec![
            fight(vec![Athlete::named("A"), Athlete::named("B")], None),
            fight(vec![Athlete::named("C"), Athlete::named("D")], None),
        ];
        let msg = new_fights_message("UFC 300", date(), &fights, la());
        assert!(msg.starts_with("🚨 **UFC 300**\n\n📅 **Saturday, July 26, 2025 at 9:00 AM PDT**"));
        assert!(msg.contains("🥊 **New fights added:**"));
        assert!(msg.contains("**1.** **A** vs **B**\n\n"));
        assert!(msg.contains("**2.** **C** vs **D**\n\n"));
    }

    #[test]
    fn changes_and_removals() {
        let changes = EventChanges {
            event_date: date(),
            changes: vec!["A vs B → A vs C".into()],
        };
        let msg = changes_message("UFC 300", &changes, la());
        assert!(msg.starts_with("⚠️ **UFC 300**"));
        assert!(msg.contains("**1.** A vs B → A vs C"));

        let removed = removed_message(&[RemovedFight {
            fight_id: "f2".into(),
            fight_name: "C vs D".into(),
            event_name: "UFC 300".into(),
        }]);
        assert_eq!(removed, "❌ **Fights Removed**\n\n**1.** UFC 300: C vs D\n\n");
    }

    #[test]
    fn truncation_counts_characters() {
        let short = "é".repeat(MAX_CONTENT_CHARS);
        assert_eq!(truncate_content(&short), short);

        let long = "é".repeat(MAX_CONTENT_CHARS + 5);
        let cut = truncate_content(&long);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            cut.chars().count(),
            MAX_CONTENT_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    // ── WebhookNotifier ────────────────────────────────────────────

    #[tokio::test]
    async fn webhook_posts_truncated_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/hook", server.uri()))).unwrap();
        notifier.send(&"x".repeat(2500)).await;

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let content = body["content"].as_str().unwrap();
        assert!(content.ends_with(TRUNCATION_MARKER));
        assert!(content.starts_with(&"x".repeat(MAX_CONTENT_CHARS)));
    }

    #[tokio::test]
    async fn webhook_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Some(format!("{}/hook", server.uri()))).unwrap();
        notifier.send("hello").await;
    }

    #[tokio::test]
    async fn unset_webhook_logs_instead_of_posting() {
        let notifier = WebhookNotifier::new(None).unwrap();
        assert!(notifier.url.is_none());
        notifier.send(&"y".repeat(2500)).await;
    }
}
