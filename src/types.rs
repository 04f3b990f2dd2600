use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::UNKNOWN_FIGHTER;

/// Parse an upstream timestamp.
///
/// ESPN mostly sends minute precision without seconds (`2025-07-26T16:00Z`),
/// which RFC 3339 parsing rejects, so that shape is tried second.
pub fn parse_api_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%MZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// True when a participant name is a "to be announced" placeholder.
pub fn is_placeholder_name(name: &str) -> bool {
    name.to_lowercase().contains("tba")
}

/// A resolved fighter profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Athlete {
    pub id: Option<String>,
    pub display_name: String,
    pub nickname: Option<String>,
    /// Overall record summary, e.g. `"27-8-0"`.
    pub record: Option<String>,
    pub weight_class: Option<String>,
    pub citizenship: Option<String>,
    pub country_flag: Option<String>,
    pub headshot: Option<String>,
}

impl Athlete {
    /// Sentinel for references that could not be resolved.
    pub fn unknown() -> Self {
        Self::named(UNKNOWN_FIGHTER)
    }

    /// A profile carrying only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: name.into(),
            nickname: None,
            record: None,
            weight_class: None,
            citizenship: None,
            country_flag: None,
            headshot: None,
        }
    }
}

/// A single bout as seen in the current poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Fight {
    pub fight_id: String,
    pub event_id: String,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    /// Competitors in upstream order.
    pub athletes: Vec<Athlete>,
    pub weight_class: Option<String>,
    /// False iff every participant is a placeholder.
    pub announced: bool,
}

impl Fight {
    pub fn participant_names(&self) -> Vec<&str> {
        self.athletes.iter().map(|a| a.display_name.as_str()).collect()
    }

    /// `"A vs B"` in upstream order.
    pub fn fight_name(&self) -> String {
        self.participant_names().join(" vs ")
    }
}

/// A card with its normalized fights.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub fights: Vec<Fight>,
}

/// Where an event sits relative to "now" and the forward horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventWindow {
    Past,
    Upcoming,
    TooFar,
}

// ── Snapshot ───────────────────────────────────────────────────────

/// A participant as persisted in a snapshot.
///
/// Older snapshots stored plain names, some stored whole profiles; anything
/// else is kept verbatim and ignored when comparing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Participant {
    Name(String),
    Profile {
        #[serde(default, rename = "displayName")]
        display_name: Option<String>,
        #[serde(default, rename = "shortDisplay")]
        short_display: Option<String>,
    },
    Other(Value),
}

impl Participant {
    /// Comparison key for this participant, if it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Participant::Name(name) => Some(name),
            Participant::Profile {
                display_name,
                short_display,
            } => Some(
                display_name
                    .as_deref()
                    .or(short_display.as_deref())
                    .unwrap_or(UNKNOWN_FIGHTER),
            ),
            Participant::Other(_) => None,
        }
    }
}

/// Previously seen state of one fight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightDetails {
    #[serde(default, deserialize_with = "lenient_string")]
    pub fight_name: String,
    #[serde(default, alias = "athletes", deserialize_with = "lenient_participants")]
    pub participants: Vec<Participant>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub event_name: String,
    #[serde(default, deserialize_with = "lenient_date")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default = "default_announced", deserialize_with = "lenient_announced")]
    pub announced: bool,
}

fn default_announced() -> bool {
    true
}

/// Strings, numbers, or nothing (`null` and other shapes become empty).
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_announced<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?
        .as_bool()
        .unwrap_or_else(default_announced))
}

fn lenient_participants<'de, D>(deserializer: D) -> Result<Vec<Participant>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value(item.clone()).unwrap_or(Participant::Other(item)))
        .collect())
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_str().and_then(parse_api_date))
}

impl FightDetails {
    pub fn from_fight(fight: &Fight) -> Self {
        Self {
            fight_name: fight.fight_name(),
            participants: fight
                .athletes
                .iter()
                .map(|a| Participant::Name(a.display_name.clone()))
                .collect(),
            event_id: fight.event_id.clone(),
            event_name: fight.event_name.clone(),
            event_date: Some(fight.event_date),
            announced: fight.announced,
        }
    }

    /// Participant names, sorted, for order-insensitive comparison.
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.participants.iter().filter_map(Participant::name).collect();
        names.sort_unstable();
        names
    }

    /// Stored fight name, or the participants joined when none was stored.
    pub fn display_name(&self) -> String {
        if !self.fight_name.is_empty() {
            return self.fight_name.clone();
        }
        self.participants
            .iter()
            .filter_map(Participant::name)
            .collect::<Vec<_>>()
            .join(" vs ")
    }
}

/// Fight id → details as of the last successful poll.
pub type FightSnapshot = BTreeMap<String, FightDetails>;

// ── Diff results ───────────────────────────────────────────────────

/// Participant changes detected for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventChanges {
    pub event_date: DateTime<Utc>,
    /// `"old A vs old B → new A vs new B"` lines.
    pub changes: Vec<String>,
}

/// A fight that disappeared while its event is still on the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFight {
    pub fight_id: String,
    pub fight_name: String,
    pub event_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FightDiff {
    /// Keyed by the current event name.
    pub changed: BTreeMap<String, EventChanges>,
    pub removed: Vec<RemovedFight>,
}

impl FightDiff {
    pub fn change_count(&self) -> usize {
        self.changed.values().map(|c| c.changes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

// ── Ledgers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnannouncedFight {
    pub event_id: String,
    pub event_name: String,
    pub fight_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastFight {
    pub fight_id: String,
    pub athletes: Vec<String>,
}

/// Archived card; the archive is append-only and keyed by `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastEvent {
    pub event_id: String,
    pub event_name: String,
    pub fights: Vec<PastFight>,
}

impl From<&Event> for PastEvent {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_name: event.name.clone(),
            fights: event
                .fights
                .iter()
                .map(|f| PastFight {
                    fight_id: f.fight_id.clone(),
                    athletes: f.athletes.iter().map(|a| a.display_name.clone()).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FightLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_name: String,
    pub fight: String,
}

/// Counters for one completed watcher cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub timestamp: String,
    pub events_checked: usize,
    pub upcoming_events: usize,
    pub archived_events: usize,
    pub new_fights: usize,
    pub updated_fights: usize,
    pub changes: usize,
    pub removals: usize,
    pub cached_athletes: usize,
    pub elapsed_secs: f64,
}

impl CycleSummary {
    pub fn has_activity(&self) -> bool {
        self.new_fights > 0 || self.changes > 0 || self.removals > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_minute_precision_dates() {
        let dt = parse_api_date("2025-07-26T16:00Z").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 26, 16, 0, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_dates() {
        let dt = parse_api_date("2025-07-26T18:30:00+02:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 26, 16, 30, 0).unwrap());
        assert!(parse_api_date("next saturday").is_none());
    }

    #[test]
    fn placeholder_is_case_insensitive_substring() {
        assert!(is_placeholder_name("TBA"));
        assert!(is_placeholder_name("Opponent Tba"));
        assert!(!is_placeholder_name("Tai Tuivasa"));
    }

    #[test]
    fn snapshot_accepts_string_participants() {
        let details: FightDetails = serde_json::from_value(json!({
            "fightName": "B vs A",
            "athletes": ["B", "A"],
            "eventId": "E1",
            "eventName": "UFC 300",
            "eventDate": "2025-07-26T16:00Z",
            "unannounced": false
        }))
        .unwrap();
        assert_eq!(details.sorted_names(), vec!["A", "B"]);
        assert!(details.event_date.is_some());
    }

    #[test]
    fn snapshot_accepts_profile_participants() {
        let details: FightDetails = serde_json::from_value(json!({
            "participants": [{"displayName": "Zed"}, {"shortDisplay": "Amy"}, {}, 7],
            "eventId": "E1"
        }))
        .unwrap();
        assert_eq!(details.sorted_names(), vec!["Amy", UNKNOWN_FIGHTER, "Zed"]);
    }

    #[test]
    fn snapshot_non_list_participants_become_empty() {
        let details: FightDetails = serde_json::from_value(json!({
            "participants": "A vs B",
            "eventId": "E1"
        }))
        .unwrap();
        assert!(details.participants.is_empty());
        assert!(details.sorted_names().is_empty());
    }

    #[test]
    fn display_name_falls_back_to_participants() {
        let details = FightDetails {
            fight_name: String::new(),
            participants: vec![Participant::Name("A".into()), Participant::Name("B".into())],
            event_id: "E1".into(),
            event_name: "UFC 300".into(),
            event_date: None,
            announced: true,
        };
        assert_eq!(details.display_name(), "A vs B");
    }
}
