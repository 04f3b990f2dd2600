use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{FightDetails, FightLogEntry, FightSnapshot, PastEvent, UnannouncedFight};

pub const KNOWN_EVENTS_FILE: &str = "knownEvents.json";
pub const KNOWN_FIGHTS_FILE: &str = "knownFights.json";
pub const PAST_EVENTS_FILE: &str = "pastEvents.json";
pub const UNANNOUNCED_FILE: &str = "upcomingUnannouncedFights.json";
pub const FIGHT_DETAILS_FILE: &str = "fightDetails.json";
pub const FIGHT_LOG_FILE: &str = "fightLog.json";

/// Flat JSON files in one directory.
///
/// Reads never fail: a missing or unreadable file is its empty default.
/// Writes replace the whole file via a temp file and rename.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

/// Everything a standard cycle reads before polling.
#[derive(Debug, Default)]
pub struct WatcherState {
    pub known_events: Vec<String>,
    pub known_fights: Vec<String>,
    pub unannounced: Vec<UnannouncedFight>,
    pub snapshot: FightSnapshot,
}

impl WatcherState {
    pub fn known_fight_ids(&self) -> HashSet<&str> {
        self.known_fights.iter().map(String::as_str).collect()
    }

    pub fn unannounced_ids(&self) -> HashSet<&str> {
        self.unannounced.iter().map(|u| u.fight_id.as_str()).collect()
    }
}

/// Everything a successful standard cycle writes back.
#[derive(Debug, Default)]
pub struct CycleWrites {
    pub known_events: Vec<String>,
    pub known_fights: Vec<String>,
    pub unannounced: Vec<UnannouncedFight>,
    pub snapshot: FightSnapshot,
    pub log: Vec<FightLogEntry>,
    pub archived: Vec<PastEvent>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Load a file, falling back to `T::default()` when missing or corrupt.
    pub fn load<T: DeserializeOwned + Default>(&self, file: &str) -> T {
        let path = self.path(file);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, starting empty", path.display());
                return T::default();
            }
            Err(e) => {
                warn!("Failed to read {}: {e}", path.display());
                return T::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => value,
            Err(e) => {
                warn!("Corrupt {}, starting empty: {e}", path.display());
                T::default()
            }
        }
    }

    /// Replace a file with the pretty-printed JSON of `value`.
    pub fn save<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path(file);
        let tmp = self.path(&format!(".{file}.tmp"));
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize {file}"))?;
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        debug!("Saved {}", path.display());
        Ok(())
    }

    pub fn load_state(&self) -> WatcherState {
        WatcherState {
            known_events: self.load(KNOWN_EVENTS_FILE),
            known_fights: self.load(KNOWN_FIGHTS_FILE),
            unannounced: self.load(UNANNOUNCED_FILE),
            snapshot: self.load_snapshot(),
        }
    }

    /// Load the fight snapshot entry by entry, dropping only malformed records.
    pub fn load_snapshot(&self) -> FightSnapshot {
        let raw: BTreeMap<String, Value> = self.load(FIGHT_DETAILS_FILE);
        raw.into_iter()
            .filter_map(|(fight_id, value)| {
                match serde_json::from_value::<FightDetails>(value) {
                    Ok(details) => Some((fight_id, details)),
                    Err(e) => {
                        warn!("Dropping malformed snapshot entry {fight_id}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Event ids already in the past-events archive.
    pub fn archived_event_ids(&self) -> HashSet<String> {
        self.load::<Vec<PastEvent>>(PAST_EVENTS_FILE)
            .into_iter()
            .map(|e| e.event_id)
            .collect()
    }

    /// Append events to the archive, skipping ids it already holds.
    ///
    /// Returns how many were actually added.
    pub fn append_past_events(&self, events: &[PastEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut archive: Vec<PastEvent> = self.load(PAST_EVENTS_FILE);
        let mut seen: HashSet<String> = archive.iter().map(|e| e.event_id.clone()).collect();
        let before = archive.len();
        for event in events {
            if seen.insert(event.event_id.clone()) {
                archive.push(event.clone());
            }
        }
        let added = archive.len() - before;
        if added > 0 {
            self.save(PAST_EVENTS_FILE, &archive)?;
        }
        Ok(added)
    }

    pub fn append_fight_log(&self, entries: &[FightLogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut log: Vec<FightLogEntry> = self.load(FIGHT_LOG_FILE);
        log.extend_from_slice(entries);
        self.save(FIGHT_LOG_FILE, &log)
    }

    /// Persist the outcome of a successful cycle.
    pub fn save_cycle(&self, writes: &CycleWrites) -> Result<()> {
        self.save(KNOWN_EVENTS_FILE, &writes.known_events)?;
        self.save(KNOWN_FIGHTS_FILE, &writes.known_fights)?;
        self.save(UNANNOUNCED_FILE, &writes.unannounced)?;
        self.save(FIGHT_DETAILS_FILE, &writes.snapshot)?;
        self.append_fight_log(&writes.log)?;
        let archived = self.append_past_events(&writes.archived)?;
        debug!(
            "State saved: {} events, {} fights, {} archived",
            writes.known_events.len(),
            writes.known_fights.len(),
            archived
        );
        Ok(())
    }
}
