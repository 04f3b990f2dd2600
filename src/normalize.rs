use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::api::{
    AthleteDocument, Competition, EventDocument, JsonSource, fetch_athlete_record, parse_lenient,
    with_locale,
};
use crate::flags::{country_flag, flag_from_url};
use crate::types::{Athlete, Event, Fight, is_placeholder_name, parse_api_date};

/// Resolved athletes keyed by reference URL, scoped to one run.
///
/// Only successful resolutions are stored so a transient failure is retried
/// the next time the reference shows up.
#[derive(Debug, Default)]
pub struct AthleteCache {
    entries: HashMap<String, Athlete>,
    hits: usize,
}

impl AthleteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, reference: &str) -> Option<Athlete> {
        let hit = self.entries.get(reference).cloned();
        if hit.is_some() {
            self.hits += 1;
        }
        hit
    }

    pub fn insert(&mut self, reference: String, athlete: Athlete) {
        self.entries.insert(reference, athlete);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// Fetch one athlete document plus its overall record.
async fn fetch_athlete<S: JsonSource>(source: &S, reference: &str) -> Option<Athlete> {
    let body = source.fetch_json(&with_locale(reference)).await?;
    let doc: AthleteDocument = parse_lenient(body, "athlete")?;
    let record = match doc.id.as_deref() {
        Some(id) => fetch_athlete_record(source, id).await,
        None => None,
    };
    Some(build_athlete(doc, record))
}

fn build_athlete(doc: AthleteDocument, record: Option<String>) -> Athlete {
    let flag_href = doc.flag.and_then(|f| f.href);
    let country_flag = doc
        .citizenship
        .as_deref()
        .and_then(country_flag)
        .or_else(|| flag_href.as_deref().and_then(flag_from_url));

    let athlete = Athlete {
        id: doc.id,
        display_name: doc
            .display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| Athlete::unknown().display_name),
        nickname: doc.nickname.filter(|n| !n.trim().is_empty()),
        record,
        weight_class: doc.weight_class.and_then(|w| w.text),
        citizenship: doc.citizenship,
        country_flag,
        headshot: doc.headshot.and_then(|h| h.href),
    };
    debug!(
        "Fighter: {} nickname={:?} record={:?} flag={:?}",
        athlete.display_name, athlete.nickname, athlete.record, athlete.country_flag
    );
    athlete
}

/// Resolve athlete references in order, `batch_size` at a time.
///
/// Missing references and failed fetches yield [`Athlete::unknown`]; the
/// output always has one entry per input.
pub async fn resolve_athletes<S: JsonSource>(
    source: &S,
    cache: &mut AthleteCache,
    references: &[Option<String>],
    batch_size: usize,
) -> Vec<Athlete> {
    let mut resolved: Vec<Option<Athlete>> = vec![None; references.len()];
    // Each uncached ref is fetched once even if it appears in several slots.
    let mut pending: Vec<(String, Vec<usize>)> = Vec::new();

    for (idx, reference) in references.iter().enumerate() {
        let Some(reference) = reference else {
            resolved[idx] = Some(Athlete::unknown());
            continue;
        };
        if let Some(hit) = cache.get(reference) {
            resolved[idx] = Some(hit);
        } else if let Some((_, slots)) = pending.iter_mut().find(|(r, _)| r == reference) {
            slots.push(idx);
        } else {
            pending.push((reference.clone(), vec![idx]));
        }
    }

    if !pending.is_empty() {
        info!("Fetching {} fighters...", pending.len());
    }

    let total = pending.len();
    let mut fetched = 0usize;
    for chunk in pending.chunks(batch_size.max(1)) {
        let results = join_all(chunk.iter().map(|(r, _)| fetch_athlete(source, r))).await;
        for ((reference, slots), athlete) in chunk.iter().zip(results) {
            let athlete = match athlete {
                Some(a) => {
                    cache.insert(reference.clone(), a.clone());
                    fetched += 1;
                    a
                }
                None => {
                    warn!("Could not resolve fighter {reference}");
                    Athlete::unknown()
                }
            };
            for &slot in slots {
                resolved[slot] = Some(athlete.clone());
            }
        }
        if total > 10 {
            debug!("Fighters progress: {fetched}/{total}");
        }
    }

    resolved
        .into_iter()
        .map(|a| a.unwrap_or_else(Athlete::unknown))
        .collect()
}

/// Convert raw competitions into fights, preserving competition order.
///
/// Competitions without an id are dropped; everything else is emitted even
/// when its athletes degrade to the unknown sentinel.
pub async fn normalize_competitions<S: JsonSource>(
    source: &S,
    cache: &mut AthleteCache,
    competitions: &[Competition],
    event_id: &str,
    event_name: &str,
    event_date: DateTime<Utc>,
    batch_size: usize,
) -> Vec<Fight> {
    let mut references = Vec::new();
    let mut layout = Vec::with_capacity(competitions.len());

    for comp in competitions {
        let Some(fight_id) = comp.id.clone() else {
            warn!("Competition without id in {event_name}, skipping");
            continue;
        };
        let mut competitors: Vec<_> = comp.competitors.iter().collect();
        competitors.sort_by_key(|c| c.order.unwrap_or(u32::MAX));
        let start = references.len();
        references.extend(
            competitors
                .iter()
                .map(|c| c.athlete.as_ref().and_then(|a| a.href.clone())),
        );
        let weight_class = comp.kind.as_ref().and_then(|k| k.text.clone());
        layout.push((fight_id, start..references.len(), weight_class));
    }

    debug!("Collected {} athlete refs for {event_name}", references.len());
    let athletes = resolve_athletes(source, cache, &references, batch_size).await;

    layout
        .into_iter()
        .map(|(fight_id, range, weight_class)| {
            let athletes = athletes[range].to_vec();
            let announced = !athletes.iter().all(|a| is_placeholder_name(&a.display_name));
            Fight {
                fight_id,
                event_id: event_id.to_string(),
                event_name: event_name.to_string(),
                event_date,
                athletes,
                weight_class,
                announced,
            }
        })
        .collect()
}

/// Normalize a complete event document; `None` when its date does not parse.
pub async fn normalize_event<S: JsonSource>(
    source: &S,
    cache: &mut AthleteCache,
    event_id: &str,
    doc: &EventDocument,
    batch_size: usize,
) -> Option<Event> {
    let name = doc.name.clone()?;
    let Some(date) = doc.date.as_deref().and_then(parse_api_date) else {
        warn!("Event {event_id} ({name}) has an unreadable date, skipping");
        return None;
    };
    let fights =
        normalize_competitions(source, cache, &doc.competitions(), event_id, &name, date, batch_size)
            .await;
    Some(Event {
        event_id: event_id.to_string(),
        name,
        date,
        fights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// In-memory upstream keyed by exact URL.
    #[derive(Default)]
    struct StaticSource {
        docs: HashMap<String, Value>,
        calls: Mutex<Vec<String>>,
    }

    impl StaticSource {
        fn with(mut self, url: &str, body: Value) -> Self {
            self.docs.insert(url.to_string(), body);
            self
        }

        fn athlete(self, id: &str, name: &str, citizenship: &str, record: &str) -> Self {
            self.with(
                &format!("http://x.test/athletes/{id}?lang=en&region=us"),
                json!({"id": id, "displayName": name, "citizenship": citizenship,
                       "nickname": "", "weightClass": {"text": "Lightweight"}}),
            )
            .with(
                &crate::api::athlete_records_url(id),
                json!({"items": [{"name": "overall", "summary": record}]}),
            )
        }

        fn call_count(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
        }
    }

    impl JsonSource for StaticSource {
        async fn fetch_json(&self, url: &str) -> Option<Value> {
            self.calls.lock().unwrap().push(url.to_string());
            self.docs.get(url).cloned()
        }
    }

    fn competition(id: &str, athlete_ids: &[&str]) -> Competition {
        serde_json::from_value(json!({
            "id": id,
            "type": {"text": "Lightweight"},
            "competitors": athlete_ids.iter().enumerate().map(|(i, a)| json!({
                "order": i + 1,
                "athlete": {"$ref": format!("http://x.test/athletes/{a}")}
            })).collect::<Vec<_>>()
        }))
        .unwrap()
    }

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 26, 16, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn resolves_profiles_in_order() {
        let source = StaticSource::default()
            .athlete("1", "Charles Oliveira", "Brazil", "34-10-0")
            .athlete("2", "Justin Gaethje", "USA", "25-5-0");
        let mut cache = AthleteCache::new();

        let fights = normalize_competitions(
            &source, &mut cache, &[competition("f1", &["1", "2"])], "E1", "UFC 300", date(), 6,
        )
        .await;

        assert_eq!(fights.len(), 1);
        let fight = &fights[0];
        assert_eq!(fight.fight_id, "f1");
        assert_eq!(fight.participant_names(), vec!["Charles Oliveira", "Justin Gaethje"]);
        assert_eq!(fight.weight_class.as_deref(), Some("Lightweight"));
        assert!(fight.announced);
        assert_eq!(fight.athletes[0].record.as_deref(), Some("34-10-0"));
        assert_eq!(fight.athletes[0].country_flag.as_deref(), Some("🇧🇷"));
        assert!(fight.athletes[0].nickname.is_none());
    }

    #[tokio::test]
    async fn competitor_order_field_wins_over_array_order() {
        let source = StaticSource::default()
            .athlete("1", "A", "USA", "1-0-0")
            .athlete("2", "B", "USA", "1-0-0");
        let comp: Competition = serde_json::from_value(json!({
            "id": "f1",
            "competitors": [
                {"order": 2, "athlete": {"$ref": "http://x.test/athletes/2"}},
                {"order": 1, "athlete": {"$ref": "http://x.test/athletes/1"}}
            ]
        }))
        .unwrap();
        let mut cache = AthleteCache::new();
        let fights = normalize_competitions(&source, &mut cache, &[comp], "E1", "UFC", date(), 6).await;
        assert_eq!(fights[0].participant_names(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn unresolvable_fighter_degrades_to_unknown() {
        let source = StaticSource::default().athlete("1", "Known Fighter", "USA", "10-0-0");
        let mut cache = AthleteCache::new();

        let fights = normalize_competitions(
            &source, &mut cache, &[competition("f1", &["1", "404"])], "E1", "UFC", date(), 6,
        )
        .await;

        assert_eq!(fights.len(), 1);
        assert_eq!(fights[0].participant_names(), vec!["Known Fighter", "Unknown Fighter"]);
        // failures are not cached
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_athlete_reference_degrades_to_unknown() {
        let source = StaticSource::default();
        let comp: Competition =
            serde_json::from_value(json!({"id": "f1", "competitors": [{"order": 1}]})).unwrap();
        let mut cache = AthleteCache::new();
        let fights = normalize_competitions(&source, &mut cache, &[comp], "E1", "UFC", date(), 6).await;
        assert_eq!(fights[0].participant_names(), vec!["Unknown Fighter"]);
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_placeholder_names_mark_unannounced() {
        let source = StaticSource::default()
            .athlete("t1", "TBA", "", "")
            .athlete("t2", "Tba Opponent", "", "")
            .athlete("1", "Real Name", "USA", "5-0-0");
        let mut cache = AthleteCache::new();

        let fights = normalize_competitions(
            &source,
            &mut cache,
            &[competition("f1", &["t1", "t2"]), competition("f2", &["1", "t1"])],
            "E1",
            "UFC",
            date(),
            6,
        )
        .await;

        assert!(!fights[0].announced);
        assert!(fights[1].announced);
    }

    #[tokio::test]
    async fn cache_prevents_refetch_across_events() {
        let source = StaticSource::default()
            .athlete("1", "A", "USA", "1-0-0")
            .athlete("2", "B", "USA", "1-0-0");
        let mut cache = AthleteCache::new();
        let comps = [competition("f1", &["1", "2"])];

        normalize_competitions(&source, &mut cache, &comps, "E1", "UFC", date(), 6).await;
        normalize_competitions(&source, &mut cache, &comps, "E2", "UFC", date(), 6).await;

        assert_eq!(source.call_count("http://x.test/athletes/1?lang=en&region=us"), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 2);
    }

    #[tokio::test]
    async fn duplicate_refs_in_one_batch_fetch_once() {
        let source = StaticSource::default().athlete("1", "A", "USA", "1-0-0");
        let mut cache = AthleteCache::new();
        let refs = vec![
            Some("http://x.test/athletes/1".to_string()),
            Some("http://x.test/athletes/1".to_string()),
        ];
        let athletes = resolve_athletes(&source, &mut cache, &refs, 1).await;
        assert_eq!(athletes.len(), 2);
        assert_eq!(source.call_count("http://x.test/athletes/1?lang=en&region=us"), 1);
    }

    #[tokio::test]
    async fn event_with_bad_date_is_skipped() {
        let source = StaticSource::default();
        let doc: EventDocument = serde_json::from_value(json!({
            "name": "UFC 300", "date": "soon", "competitions": []
        }))
        .unwrap();
        let mut cache = AthleteCache::new();
        assert!(normalize_event(&source, &mut cache, "E1", &doc, 6).await.is_none());
    }

    #[tokio::test]
    async fn event_normalizes_with_header_fields() {
        let source = StaticSource::default()
            .athlete("1", "A", "USA", "1-0-0")
            .athlete("2", "B", "USA", "1-0-0");
        let doc: EventDocument = serde_json::from_value(json!({
            "name": "UFC 300",
            "date": "2025-07-26T16:00Z",
            "competitions": [
                {"id": "f1", "competitors": [
                    {"athlete": {"$ref": "http://x.test/athletes/1"}},
                    {"athlete": {"$ref": "http://x.test/athletes/2"}}
                ]},
                {"competitors": []}
            ]
        }))
        .unwrap();
        let mut cache = AthleteCache::new();
        let event = normalize_event(&source, &mut cache, "E1", &doc, 6).await.unwrap();
        assert_eq!(event.name, "UFC 300");
        assert_eq!(event.date, date());
        assert_eq!(event.fights.len(), 1);
        assert_eq!(event.fights[0].event_id, "E1");
    }
}
