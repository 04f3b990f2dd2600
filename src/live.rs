//! Live card tracking: status normalization, event phase and per-fight progress.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::api::{LiveCompetition, Scoreboard, ScoreboardEvent, Status, StatusType};
use crate::types::parse_api_date;

/// Poll interval while nothing is live or close.
pub const IDLE_CHECK: Duration = Duration::from_secs(3 * 60 * 60);
/// Poll interval when a card starts within a few hours.
pub const UPCOMING_CHECK: Duration = Duration::from_secs(30 * 60);
/// Poll interval after the scoreboard could not be fetched.
pub const FAILURE_CHECK: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightStatus {
    Scheduled,
    Live,
    Completed,
    Unknown,
}

/// Every upstream spelling observed so far, lowercased.
const STATUS_TABLE: &[(&str, FightStatus)] = &[
    ("pre", FightStatus::Scheduled),
    ("scheduled", FightStatus::Scheduled),
    ("status_scheduled", FightStatus::Scheduled),
    ("status_postponed", FightStatus::Scheduled),
    ("in", FightStatus::Live),
    ("live", FightStatus::Live),
    ("in progress", FightStatus::Live),
    ("status_in_progress", FightStatus::Live),
    ("status_end_of_round", FightStatus::Live),
    ("status_fight_in_progress", FightStatus::Live),
    ("post", FightStatus::Completed),
    ("final", FightStatus::Completed),
    ("completed", FightStatus::Completed),
    ("status_final", FightStatus::Completed),
    ("status_full_time", FightStatus::Completed),
    ("status_canceled", FightStatus::Completed),
];

impl FightStatus {
    /// Look up a single upstream status string.
    pub fn parse(raw: &str) -> Self {
        let key = raw.trim().to_lowercase();
        STATUS_TABLE
            .iter()
            .find(|(spelling, _)| *spelling == key)
            .map(|(_, status)| *status)
            .unwrap_or(FightStatus::Unknown)
    }

    /// Normalize a status block: `state`, then `name`, then the `completed` flag.
    pub fn from_type(kind: &StatusType) -> Self {
        [kind.state.as_deref(), kind.name.as_deref()]
            .into_iter()
            .flatten()
            .map(Self::parse)
            .find(|s| *s != FightStatus::Unknown)
            .unwrap_or(if kind.completed {
                FightStatus::Completed
            } else {
                FightStatus::Unknown
            })
    }

    pub fn from_status(status: Option<&Status>) -> Self {
        status
            .and_then(|s| s.kind.as_ref())
            .map(Self::from_type)
            .unwrap_or(FightStatus::Unknown)
    }
}

// ── Event phase ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Idle,
    UpcomingSoon { minutes_until: i64 },
    Live,
}

/// Classify a card by its status and distance from `now`.
pub fn event_phase(status: FightStatus, start: DateTime<Utc>, now: DateTime<Utc>) -> EventPhase {
    let hours = (now - start).num_seconds().abs() as f64 / 3600.0;

    let live = match status {
        FightStatus::Live => true,
        FightStatus::Scheduled => hours <= 0.5,
        FightStatus::Completed => hours <= 2.0,
        FightStatus::Unknown => {
            start - TimeDelta::minutes(30) <= now && now <= start + TimeDelta::hours(4)
        }
    };

    if live {
        EventPhase::Live
    } else if start > now && hours <= 4.0 {
        EventPhase::UpcomingSoon {
            minutes_until: (start - now).num_minutes(),
        }
    } else {
        EventPhase::Idle
    }
}

/// Result of one scoreboard check.
#[derive(Debug, Clone)]
pub struct LiveCheck {
    pub phase: EventPhase,
    /// The live or upcoming event, when there is one.
    pub event: Option<ScoreboardEvent>,
}

impl LiveCheck {
    pub fn idle() -> Self {
        Self {
            phase: EventPhase::Idle,
            event: None,
        }
    }

    /// How long to wait before the next check.
    pub fn next_check(&self, live_refresh: Duration) -> Duration {
        match self.phase {
            EventPhase::Live => live_refresh,
            EventPhase::UpcomingSoon { .. } => UPCOMING_CHECK,
            EventPhase::Idle => IDLE_CHECK,
        }
    }

    pub fn event_name(&self) -> &str {
        self.event.as_ref().map(|e| e.name.as_str()).unwrap_or_default()
    }
}

/// First scoreboard event that is live or starting soon, in scoreboard order.
pub fn check_live_events(board: &Scoreboard, now: DateTime<Utc>) -> LiveCheck {
    debug!("Checking {} scoreboard events for live status", board.events.len());
    for event in &board.events {
        let Some(start) = parse_api_date(&event.date) else {
            debug!("Skipping {} with unreadable date {:?}", event.name, event.date);
            continue;
        };
        let status = FightStatus::from_status(event.status.as_ref());
        let phase = event_phase(status, start, now);
        debug!("{}: {status:?} at {start} → {phase:?}", event.name);
        match phase {
            EventPhase::Idle => continue,
            EventPhase::Live => info!("Live event detected: {}", event.name),
            EventPhase::UpcomingSoon { minutes_until } => {
                info!("Upcoming event: {} in {minutes_until} minutes", event.name)
            }
        }
        return LiveCheck {
            phase,
            event: Some(event.clone()),
        };
    }
    LiveCheck::idle()
}

// ── Fight tracker ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FightProgress {
    pub status: FightStatus,
    pub round: Option<u32>,
    pub clock: Option<String>,
}

/// A notable transition in one fight.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveAlert {
    Started {
        fight: String,
    },
    RoundStarted {
        fight: String,
        round: u32,
    },
    Ended {
        fight: String,
        winner: Option<String>,
        round: Option<u32>,
        clock: Option<String>,
    },
}

impl fmt::Display for LiveAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveAlert::Started { fight } => write!(f, "🥊 **{fight}** is underway"),
            LiveAlert::RoundStarted { fight, round } => write!(f, "🔔 **{fight}**: round {round}"),
            LiveAlert::Ended {
                fight,
                winner,
                round,
                clock,
            } => {
                write!(f, "🏆 **{fight}** has ended")?;
                if let Some(winner) = winner {
                    write!(f, ": {winner} wins")?;
                }
                match (round, clock) {
                    (Some(r), Some(c)) => write!(f, " (R{r}, {c})"),
                    (Some(r), None) => write!(f, " (R{r})"),
                    _ => Ok(()),
                }
            }
        }
    }
}

/// Remembers each fight's last status and reports changes.
#[derive(Debug, Default)]
pub struct LiveTracker {
    fights: HashMap<String, FightProgress>,
    /// Report fights already live or finished on first sight.
    announce_existing: bool,
}

fn fight_label(comp: &LiveCompetition) -> String {
    let mut competitors: Vec<_> = comp.competitors.iter().collect();
    competitors.sort_by_key(|c| c.order.unwrap_or(u32::MAX));
    let names: Vec<&str> = competitors
        .iter()
        .filter_map(|c| c.athlete.as_ref()?.display_name.as_deref())
        .collect();
    if names.is_empty() {
        format!("Fight {}", comp.id.as_deref().unwrap_or("?"))
    } else {
        names.join(" vs ")
    }
}

fn winner_of(comp: &LiveCompetition) -> Option<String> {
    comp.competitors
        .iter()
        .find(|c| c.winner == Some(true))
        .and_then(|c| c.athlete.as_ref()?.display_name.clone())
}

impl LiveTracker {
    pub fn new(announce_existing: bool) -> Self {
        Self {
            fights: HashMap::new(),
            announce_existing,
        }
    }

    /// Feed the latest competitions; returns alerts in competition order.
    pub fn observe(&mut self, competitions: &[LiveCompetition]) -> Vec<LiveAlert> {
        let mut alerts = Vec::new();

        for comp in competitions {
            let Some(id) = comp.id.as_ref() else {
                continue;
            };
            let status = comp.status.as_ref();
            let latest = FightProgress {
                status: FightStatus::from_status(status),
                round: status.and_then(|s| s.period),
                clock: status.and_then(|s| s.display_clock.clone()),
            };
            let fight = fight_label(comp);

            let (was_live, was_completed, prev_round) = match self.fights.get(id) {
                Some(prev) => (
                    prev.status == FightStatus::Live,
                    prev.status == FightStatus::Completed,
                    prev.round,
                ),
                None if self.announce_existing => (false, false, None),
                // first sight is a baseline
                None => (
                    latest.status == FightStatus::Live,
                    latest.status == FightStatus::Completed,
                    latest.round,
                ),
            };

            match latest.status {
                FightStatus::Live if !was_live => {
                    alerts.push(LiveAlert::Started {
                        fight: fight.clone(),
                    });
                }
                FightStatus::Live => {
                    if let Some(round) = latest.round.filter(|r| Some(*r) > prev_round) {
                        alerts.push(LiveAlert::RoundStarted {
                            fight: fight.clone(),
                            round,
                        });
                    }
                }
                FightStatus::Completed if !was_completed => {
                    alerts.push(LiveAlert::Ended {
                        fight: fight.clone(),
                        winner: winner_of(comp),
                        round: latest.round,
                        clock: latest.clock.clone(),
                    });
                }
                _ => {}
            }

            self.fights.insert(id.clone(), latest);
        }

        for alert in &alerts {
            info!("Live: {alert}");
        }
        alerts
    }

    /// True once every tracked fight has finished.
    pub fn all_completed(&self) -> bool {
        !self.fights.is_empty()
            && self
                .fights
                .values()
                .all(|p| p.status == FightStatus::Completed)
    }

    pub fn len(&self) -> usize {
        self.fights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fights.is_empty()
    }
}
