use std::collections::{HashSet, btree_map::Entry};

use chrono::{DateTime, Months, Utc};
use tracing::{debug, info};

use crate::types::{
    Event, EventChanges, EventWindow, Fight, FightDetails, FightDiff, FightLogEntry, FightSnapshot,
    RemovedFight, UnannouncedFight,
};

/// Place an event relative to `now` and the forward horizon.
///
/// Both boundaries are inclusive on the upcoming side: an event starting
/// exactly now, or exactly `horizon_months` from now, is upcoming.
pub fn classify_event(date: DateTime<Utc>, now: DateTime<Utc>, horizon_months: u32) -> EventWindow {
    if date < now {
        return EventWindow::Past;
    }
    let horizon = now
        .checked_add_months(Months::new(horizon_months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if date > horizon {
        EventWindow::TooFar
    } else {
        EventWindow::Upcoming
    }
}

/// Union of calendar ids and previously known ids, calendar order first.
pub fn merge_event_ids(calendar: &[String], known: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    calendar
        .iter()
        .chain(known)
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Diff the previous snapshot against the fights seen in this poll.
///
/// A fight missing from `current` is only reported removed while another
/// fight of the same event is still present; otherwise its whole card has
/// left the upcoming window and the disappearance is expected. Participant
/// order is ignored, as is anything in a participant entry other than its name.
pub fn detect_changes(previous: &FightSnapshot, current: &[Fight]) -> FightDiff {
    let current_ids: HashSet<&str> = current.iter().map(|f| f.fight_id.as_str()).collect();
    let current_events: HashSet<&str> = current.iter().map(|f| f.event_id.as_str()).collect();

    let mut diff = FightDiff::default();

    for (fight_id, details) in previous {
        if current_ids.contains(fight_id.as_str()) {
            continue;
        }
        if current_events.contains(details.event_id.as_str()) {
            debug!("Fight {fight_id} removed from {}", details.event_name);
            diff.removed.push(RemovedFight {
                fight_id: fight_id.clone(),
                fight_name: details.display_name(),
                event_name: details.event_name.clone(),
            });
        } else {
            debug!("Fight {fight_id} left with its event {}", details.event_id);
        }
    }

    for fight in current {
        let Some(details) = previous.get(&fight.fight_id) else {
            continue;
        };
        let old_names = details.sorted_names();
        let mut new_names = fight.participant_names();
        new_names.sort_unstable();
        if old_names == new_names {
            continue;
        }

        let line = format!("{} → {}", old_names.join(" vs "), new_names.join(" vs "));
        match diff.changed.entry(fight.event_name.clone()) {
            Entry::Occupied(mut e) => e.get_mut().changes.push(line),
            Entry::Vacant(e) => {
                e.insert(EventChanges {
                    event_date: fight.event_date,
                    changes: vec![line],
                });
            }
        }
    }

    info!(
        "Detected {} participant changes and {} removals",
        diff.change_count(),
        diff.removed.len()
    );
    diff
}

/// What one upcoming event contributes to a cycle.
#[derive(Debug, Default, PartialEq)]
pub struct EventAssessment {
    /// Fights not in the known-fights ledger.
    pub new_fights: Vec<Fight>,
    /// Fights that were placeholders last cycle and now have names.
    pub updated_fights: Vec<Fight>,
    /// Fights that are still placeholders.
    pub unannounced: Vec<UnannouncedFight>,
    pub log: Vec<FightLogEntry>,
}

/// Sort an event's fights into new, newly announced and still unannounced.
pub fn assess_event(
    event: &Event,
    known_fights: &HashSet<&str>,
    was_unannounced: &HashSet<&str>,
    now: DateTime<Utc>,
) -> EventAssessment {
    let mut out = EventAssessment::default();

    for fight in &event.fights {
        let id = fight.fight_id.as_str();
        if fight.announced && was_unannounced.contains(id) {
            out.updated_fights.push(fight.clone());
        }
        if !fight.announced {
            out.unannounced.push(UnannouncedFight {
                event_id: event.event_id.clone(),
                event_name: event.name.clone(),
                fight_id: fight.fight_id.clone(),
            });
        }
        if !known_fights.contains(id) {
            out.new_fights.push(fight.clone());
            out.log.push(FightLogEntry {
                timestamp: now,
                event_name: event.name.clone(),
                fight: fight.fight_name(),
            });
        }
    }

    out
}

/// Snapshot of every fight seen this poll.
pub fn build_snapshot(fights: &[Fight]) -> FightSnapshot {
    fights
        .iter()
        .map(|f| (f.fight_id.clone(), FightDetails::from_fight(f)))
        .collect()
}

/// Next known-fights ledger: `(known ∪ new) ∩ current`, first-seen order.
pub fn retain_known_fights(known: &[String], new: &[String], current: &HashSet<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    known
        .iter()
        .chain(new)
        .filter(|id| current.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect()
}
