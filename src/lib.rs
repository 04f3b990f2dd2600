pub mod api;
pub mod config;
pub mod engine;
pub mod flags;
pub mod live;
pub mod normalize;
pub mod reporter;
pub mod state;
pub mod types;
pub mod watcher;

/// ESPN site API scoreboard (schedule index + inline live statuses).
pub const SCOREBOARD_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/mma/ufc/scoreboard";

/// ESPN core API base for UFC event documents.
pub const CORE_EVENTS_BASE: &str = "https://sports.core.api.espn.com/v2/sports/mma/leagues/ufc/events";

/// ESPN core API base for athlete documents (records live under `/<id>/records`).
pub const CORE_ATHLETES_BASE: &str = "http://sports.core.api.espn.com/v2/sports/mma/athletes";

/// Display name used when an athlete reference cannot be resolved.
pub const UNKNOWN_FIGHTER: &str = "Unknown Fighter";
