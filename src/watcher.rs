use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info, warn};

use crate::api::{JsonSource, fetch_event, fetch_events, fetch_scoreboard};
use crate::config::{AppConfig, LiveConfig, SettingsConfig};
use crate::engine::{
    EventAssessment, assess_event, build_snapshot, classify_event, detect_changes,
    merge_event_ids, retain_known_fights,
};
use crate::live::{EventPhase, FAILURE_CHECK, LiveCheck, LiveTracker, check_live_events};
use crate::normalize::{AthleteCache, normalize_event};
use crate::reporter::{self, Notifier};
use crate::state::{CycleWrites, StateStore};
use crate::types::{CycleSummary, EventWindow, Fight, PastEvent, parse_api_date};

/// Why a live or simulated session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Every fight on the card finished.
    CardEnded,
    /// The session cap elapsed.
    Expired,
    /// Ctrl-C.
    Shutdown,
}

/// Sleep for `duration`, returning `true` if Ctrl-C arrived first.
pub async fn sleep_or_shutdown(duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            true
        }
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Per-session live bookkeeping.
#[derive(Debug, Default)]
pub struct LiveSession {
    pub phase: Option<EventPhase>,
    pub event_name: Option<String>,
    pub tracker: LiveTracker,
}

/// Ties the fetch client, state store and notifier into poll cycles.
pub struct Watcher<S, N> {
    source: S,
    notifier: N,
    store: StateStore,
    settings: SettingsConfig,
    live: LiveConfig,
    tz: Tz,
}

impl<S: JsonSource, N: Notifier> Watcher<S, N> {
    pub fn new(source: S, notifier: N, config: &AppConfig) -> Result<Self> {
        Ok(Self {
            source,
            notifier,
            store: StateStore::new(&config.settings.data_dir),
            tz: config.settings.display_timezone()?,
            settings: config.settings.clone(),
            live: config.live.clone(),
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn live_refresh(&self) -> Duration {
        Duration::from_secs(self.live.refresh_secs.max(1))
    }

    fn session_cap(&self) -> Duration {
        Duration::from_secs(self.live.session_minutes * 60)
    }

    // ── Standard cycle ─────────────────────────────────────────────

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One full poll. On failure an error notice is sent and no state is written.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let started = Instant::now();
        self.notifier
            .send(&reporter::start_message(now, self.tz))
            .await;

        match self.poll(now, started).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!("Watcher cycle failed: {e:#}");
                self.notifier.send(&reporter::failure_message(&e)).await;
                Err(e)
            }
        }
    }

    async fn poll(&self, now: DateTime<Utc>, started: Instant) -> Result<CycleSummary> {
        let state = self.store.load_state();
        info!(
            "Loaded state: {} known events, {} known fights, {} snapshot entries",
            state.known_events.len(),
            state.known_fights.len(),
            state.snapshot.len()
        );

        let board = fetch_scoreboard(&self.source, None)
            .await
            .context("scoreboard unavailable")?;
        let event_ids = merge_event_ids(&board.calendar_event_ids(), &state.known_events);
        info!("Fetching {} events...", event_ids.len());

        let mut events: Vec<_> = fetch_events(&self.source, &event_ids, self.settings.event_batch_size)
            .await
            .into_iter()
            .filter_map(|(id, doc)| {
                let date = doc.date.as_deref().and_then(parse_api_date);
                if date.is_none() {
                    warn!("Event {id} has an unreadable date, skipping");
                }
                Some((id, doc, date?))
            })
            .collect();
        events.sort_by_key(|(_, _, date)| *date);
        info!("Processing {} valid events...", events.len());

        let archived = self.store.archived_event_ids();
        let known_fights = state.known_fight_ids();
        let was_unannounced = state.unannounced_ids();
        let mut cache = AthleteCache::new();

        let mut upcoming_ids = Vec::new();
        let mut newly_archived: Vec<PastEvent> = Vec::new();
        let mut current_fights: Vec<Fight> = Vec::new();
        let mut totals = EventAssessment::default();

        for (event_id, doc, date) in &events {
            let window = classify_event(*date, now, self.settings.horizon_months);
            match window {
                EventWindow::Past if archived.contains(event_id) => {
                    debug!("Past event {event_id} already archived");
                    continue;
                }
                EventWindow::TooFar => {
                    debug!("Event {event_id} is beyond the horizon, skipping");
                    continue;
                }
                EventWindow::Past | EventWindow::Upcoming => {}
            }

            let Some(event) = normalize_event(
                &self.source,
                &mut cache,
                event_id,
                doc,
                self.settings.athlete_batch_size,
            )
            .await
            else {
                continue;
            };

            if window == EventWindow::Past {
                info!("Archiving past event: {}", event.name);
                newly_archived.push(PastEvent::from(&event));
                continue;
            }

            info!("Event: {} on {} ({} fights)", event.name, event.date.date_naive(), event.fights.len());
            for fight in &event.fights {
                debug!("  Fight: {} (ID: {})", fight.fight_name(), fight.fight_id);
            }
            upcoming_ids.push(event_id.clone());

            let assessment = assess_event(&event, &known_fights, &was_unannounced, now);
            if !assessment.new_fights.is_empty() {
                let msg = reporter::new_fights_message(&event.name, event.date, &assessment.new_fights, self.tz);
                self.notifier.send(&msg).await;
            }
            if !assessment.updated_fights.is_empty() {
                let msg = reporter::updated_fights_message(
                    &event.name,
                    event.date,
                    &assessment.updated_fights,
                    self.tz,
                );
                self.notifier.send(&msg).await;
            }

            totals.new_fights.extend(assessment.new_fights);
            totals.updated_fights.extend(assessment.updated_fights);
            totals.unannounced.extend(assessment.unannounced);
            totals.log.extend(assessment.log);
            current_fights.extend(event.fights);
        }

        info!("Checking for fight changes and removals...");
        let diff = detect_changes(&state.snapshot, &current_fights);
        for (event_name, changes) in &diff.changed {
            self.notifier
                .send(&reporter::changes_message(event_name, changes, self.tz))
                .await;
        }
        if !diff.removed.is_empty() {
            self.notifier
                .send(&reporter::removed_message(&diff.removed))
                .await;
        }

        let current_ids: HashSet<&str> = current_fights.iter().map(|f| f.fight_id.as_str()).collect();
        let new_ids: Vec<String> = totals.new_fights.iter().map(|f| f.fight_id.clone()).collect();
        let writes = CycleWrites {
            known_fights: retain_known_fights(&state.known_fights, &new_ids, &current_ids),
            known_events: upcoming_ids,
            unannounced: totals.unannounced,
            snapshot: build_snapshot(&current_fights),
            log: totals.log,
            archived: newly_archived,
        };
        self.store.save_cycle(&writes)?;

        let summary = CycleSummary {
            timestamp: now.to_rfc3339(),
            events_checked: events.len(),
            upcoming_events: writes.known_events.len(),
            archived_events: writes.archived.len(),
            new_fights: totals.new_fights.len(),
            updated_fights: totals.updated_fights.len(),
            changes: diff.change_count(),
            removals: diff.removed.len(),
            cached_athletes: cache.len(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        if !summary.has_activity() {
            self.notifier.send(&reporter::no_changes_message()).await;
        }
        info!(
            "Completed in {:.2}s: {} athletes cached ({} cache hits), {} changes, {} removals",
            summary.elapsed_secs,
            summary.cached_athletes,
            cache.hits(),
            summary.changes,
            summary.removals
        );
        self.notifier
            .send(&reporter::completion_message(&summary))
            .await;
        Ok(summary)
    }

    // ── Live mode ──────────────────────────────────────────────────

    /// Act on one scoreboard check: phase transitions and fight alerts.
    ///
    /// Returns `true` when a live card just ended.
    pub async fn apply_live_check(&self, session: &mut LiveSession, check: &LiveCheck) -> bool {
        let previous = session.phase;
        let name = check.event_name().to_string();

        let ended = match (previous, check.phase) {
            (Some(EventPhase::Live), EventPhase::Live) => false,
            (_, EventPhase::Live) => {
                let fights = check.event.as_ref().map(|e| e.competitions.len()).unwrap_or(0);
                self.notifier
                    .send(&reporter::live_start_message(&name, fights, self.live.refresh_secs))
                    .await;
                session.tracker = LiveTracker::new(false);
                false
            }
            (Some(EventPhase::Live), _) => {
                let ended_name = session.event_name.clone().unwrap_or_default();
                self.notifier
                    .send(&reporter::live_end_message(&ended_name))
                    .await;
                true
            }
            (Some(EventPhase::UpcomingSoon { .. }), EventPhase::UpcomingSoon { .. }) => false,
            (_, EventPhase::UpcomingSoon { minutes_until }) => {
                self.notifier
                    .send(&reporter::upcoming_message(&name, minutes_until))
                    .await;
                false
            }
            (_, EventPhase::Idle) => false,
        };

        if check.phase == EventPhase::Live {
            if let Some(event) = &check.event {
                for alert in session.tracker.observe(&event.competitions) {
                    self.notifier
                        .send(&reporter::live_update_message(&event.name, &alert.to_string()))
                        .await;
                }
            }
        }

        session.phase = Some(check.phase);
        if check.event.is_some() {
            session.event_name = Some(name);
        }
        ended
    }

    /// Poll the scoreboard at a phase-dependent pace until the cap, Ctrl-C,
    /// or the end of a live card.
    pub async fn run_live_session(&self) -> Result<SessionEnd> {
        let deadline = Instant::now() + self.session_cap();
        let mut session = LiveSession::default();
        info!("Live session started (cap {} min)", self.live.session_minutes);

        if let Err(e) = self.run_cycle().await {
            warn!("Initial cycle failed: {e:#}");
        }

        loop {
            let wait = match fetch_scoreboard(&self.source, None).await {
                Some(board) => {
                    let check = check_live_events(&board, Utc::now());
                    if self.apply_live_check(&mut session, &check).await {
                        if let Err(e) = self.run_cycle().await {
                            warn!("Post-event cycle failed: {e:#}");
                        }
                        return Ok(SessionEnd::CardEnded);
                    }
                    check.next_check(self.live_refresh())
                }
                None => {
                    warn!("Scoreboard unavailable, retrying in {}s", FAILURE_CHECK.as_secs());
                    FAILURE_CHECK
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!("Live session cap reached");
                return Ok(SessionEnd::Expired);
            }
            if sleep_or_shutdown(wait.min(remaining)).await {
                return Ok(SessionEnd::Shutdown);
            }
        }
    }

    // ── Simulated live ─────────────────────────────────────────────

    /// Fetch the forced event's statuses once and report what changed.
    ///
    /// `None` when the scoreboard for that day is unavailable.
    pub async fn simulate_tick(
        &self,
        event_id: &str,
        day: NaiveDate,
        tracker: &mut LiveTracker,
    ) -> Option<Vec<String>> {
        let board = fetch_scoreboard(&self.source, Some(day)).await?;
        let Some(event) = board
            .events
            .iter()
            .find(|e| e.id.as_deref() == Some(event_id))
        else {
            warn!("Event {event_id} not on the {day} scoreboard");
            return Some(Vec::new());
        };
        Some(
            tracker
                .observe(&event.competitions)
                .iter()
                .map(|alert| reporter::live_update_message(&event.name, &alert.to_string()))
                .collect(),
        )
    }

    /// Replay a card as if it were live.
    pub async fn run_simulated_session(
        &self,
        event_id: &str,
        event_name: Option<&str>,
    ) -> Result<SessionEnd> {
        let doc = fetch_event(&self.source, event_id)
            .await
            .with_context(|| format!("event {event_id} unavailable"))?;
        let start = doc
            .date
            .as_deref()
            .and_then(parse_api_date)
            .with_context(|| format!("event {event_id} has no usable date"))?;
        let name = event_name
            .map(str::to_string)
            .or(doc.name.clone())
            .unwrap_or_else(|| format!("Event {event_id}"));
        let day = start.with_timezone(&self.tz).date_naive();
        info!("Simulating live mode for {name} ({event_id}) on {day}");

        let fights = doc.competitions().len();
        self.notifier
            .send(&format!(
                "🧪 SIMULATION\n\n{}",
                reporter::live_start_message(&name, fights, self.live.refresh_secs)
            ))
            .await;

        let deadline = Instant::now() + self.session_cap();
        let mut tracker = LiveTracker::new(true);
        loop {
            match self.simulate_tick(event_id, day, &mut tracker).await {
                Some(updates) => {
                    for update in updates {
                        self.notifier.send(&update).await;
                    }
                }
                None => warn!("Scoreboard for {day} unavailable"),
            }

            if tracker.all_completed() {
                self.notifier.send(&reporter::live_end_message(&name)).await;
                return Ok(SessionEnd::CardEnded);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!("Simulation cap reached with {} fights tracked", tracker.len());
                return Ok(SessionEnd::Expired);
            }
            if sleep_or_shutdown(self.live_refresh().min(remaining)).await {
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}
