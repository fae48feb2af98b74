use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Which side of the plate the requested player is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Batter,
    Pitcher,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Batter => "batter",
            Role::Pitcher => "pitcher",
        }
    }

    /// Lenient parse used by the API layer; anything that isn't "pitcher"
    /// is treated as a batter request (same default as the legacy service).
    pub fn parse(s: &str) -> Role {
        if s.trim().eq_ignore_ascii_case("pitcher") {
            Role::Pitcher
        } else {
            Role::Batter
        }
    }
}

/// One delivery from the pitch feed. Immutable once fetched.
///
/// Optional numeric fields stay `None` when the feed omits them; missing is
/// never conflated with zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitchRecord {
    pub game_id: u64,
    /// Feed-local at-bat number; not guaranteed to line up with the
    /// play-index feed's at-bat index.
    pub at_bat_number: u32,
    pub pitch_number: u32,
    pub batter_id: u64,
    pub pitcher_id: u64,
    pub game_date: Option<NaiveDate>,
    /// "R" for regular season.
    pub game_type: Option<String>,
    pub description: Option<String>,
    /// Terminal event code, set only on the pitch that ends the at-bat.
    pub event: Option<String>,
    /// Pitch call: "S", "B", or "X" (in play).
    pub call: Option<String>,
    pub balls: Option<u32>,
    pub strikes: Option<u32>,
    /// Pitch type code ("FF", "SL", ...).
    pub pitch_type: Option<String>,
    pub plate_x: Option<f64>,
    pub plate_z: Option<f64>,
    pub release_speed: Option<f64>,
    pub release_spin_rate: Option<f64>,
    pub spin_axis: Option<f64>,
    pub pfx_x: Option<f64>,
    pub pfx_z: Option<f64>,
    pub launch_speed: Option<f64>,
    pub launch_angle: Option<f64>,
    pub launch_spin_rate: Option<f64>,
    pub hit_distance: Option<f64>,
}

impl PitchRecord {
    /// Whether the ball was put in play on this delivery. Exit data is only
    /// surfaced for these pitches.
    pub fn is_hit_into_play(&self) -> bool {
        if let Some(desc) = &self.description {
            if desc.to_lowercase().contains("hit_into_play") {
                return true;
            }
        }
        matches!(
            self.event.as_deref(),
            Some(
                "single"
                    | "double"
                    | "triple"
                    | "home_run"
                    | "field_out"
                    | "force_out"
                    | "fielders_choice"
                    | "grounded_into_double_play"
                    | "double_play"
                    | "triple_play"
            )
        )
    }
}

/// The pitches sharing (game id, at-bat number), ordered by pitch number.
/// Derived from the pitch feed, never fetched directly.
#[derive(Debug, Clone)]
pub struct AtBatGroup {
    pub game_id: u64,
    pub at_bat_number: u32,
    pub pitches: Vec<PitchRecord>,
}

impl AtBatGroup {
    /// Group a raw pitch dataset into at-bats, chronological by
    /// (game id, at-bat number), pitches sorted by pitch number within each.
    pub fn group(records: Vec<PitchRecord>) -> Vec<AtBatGroup> {
        let mut by_key: BTreeMap<(u64, u32), Vec<PitchRecord>> = BTreeMap::new();
        for record in records {
            by_key
                .entry((record.game_id, record.at_bat_number))
                .or_default()
                .push(record);
        }

        by_key
            .into_iter()
            .map(|((game_id, at_bat_number), mut pitches)| {
                pitches.sort_by_key(|p| p.pitch_number);
                AtBatGroup {
                    game_id,
                    at_bat_number,
                    pitches,
                }
            })
            .collect()
    }

    pub fn batter_id(&self) -> Option<u64> {
        self.pitches.first().map(|p| p.batter_id)
    }

    pub fn pitcher_id(&self) -> Option<u64> {
        self.pitches.first().map(|p| p.pitcher_id)
    }

    pub fn pitch_count(&self) -> usize {
        self.pitches.len()
    }

    /// The event code that ended the at-bat. Scans from the back because the
    /// terminal event belongs to the last delivery.
    pub fn terminal_event(&self) -> Option<&str> {
        self.pitches.iter().rev().find_map(|p| p.event.as_deref())
    }

    pub fn game_date(&self) -> Option<NaiveDate> {
        self.pitches.first().and_then(|p| p.game_date)
    }
}

/// One at-bat's reconciliation data from the play-index feed. Read-only after
/// construction; built once per game and cached.
///
/// The four views exist because the two feeds disagree on whether non-pitch
/// deliveries (mound visits, pickoffs-as-events) consume a sequence slot. The
/// pitch-only view is what the pitch feed's per-at-bat ordering aligns to.
#[derive(Debug, Clone, Default)]
pub struct PlayIndexEntry {
    pub at_bat_index: u32,
    pub batter_id: Option<u64>,
    pub pitcher_id: Option<u64>,
    pub game_date: Option<NaiveDate>,
    /// Declared pitch number -> play identifier.
    pub by_pitch_number: HashMap<u32, String>,
    /// One slot per delivery, pitch or not. `None` where the upstream carried
    /// no identifier.
    pub by_raw_order: Vec<Option<String>>,
    /// Pitch-only sequence position (0, 1, 2, ...) -> play identifier.
    /// Canonical alignment target for the pitch feed.
    pub by_pitch_sequence: HashMap<usize, String>,
    /// Declared full-event-order index -> play identifier.
    pub by_event_order: HashMap<usize, String>,
    /// Number of actual pitches in the at-bat, identifier present or not.
    pub pitch_count: usize,
}

/// Per-game lookup structure: at-bat index -> entry.
#[derive(Debug, Clone, Default)]
pub struct GamePlayIndex {
    pub game_id: u64,
    pub game_date: Option<NaiveDate>,
    pub entries: HashMap<u32, PlayIndexEntry>,
}

/// How a pitch's play identifier was resolved. Not user-facing, but retained
/// on every annotated pitch so systematic misalignment can be diagnosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    PitchNumber,
    PitchSequence,
    EventOrder,
    RawOrder,
    NearestPitchNumber,
    /// At-bat matched by feed-local number only; batter/pitcher identity was
    /// not cross-checked.
    UnverifiedAtBat,
}

/// One pitch of the annotated timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedPitch {
    pub pitch_number: u32,
    pub pitch_type: Option<String>,
    pub balls: Option<u32>,
    pub strikes: Option<u32>,
    pub description: Option<String>,
    pub plate_x: Option<f64>,
    pub plate_z: Option<f64>,
    pub velocity: Option<f64>,
    /// Induced vertical break, inches (pfx_z * 12).
    pub ivb: Option<f64>,
    /// Horizontal break, inches, batter perspective (pfx_x * -12).
    pub hvb: Option<f64>,
    pub spin: Option<f64>,
    pub axis: Option<f64>,
    pub is_hit: bool,
    pub exit_velocity: Option<f64>,
    pub launch_angle: Option<f64>,
    pub exit_spin: Option<f64>,
    pub hit_distance: Option<f64>,
    /// Opaque identifier for downstream media lookup; null is a normal
    /// outcome for malformed or partial upstream data.
    pub play_id: Option<String>,
    pub match_method: Option<MatchMethod>,
}

/// One at-bat of the annotated timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedAtBat {
    pub game_id: u64,
    /// Feed-local number, kept for reference.
    pub at_bat_number: u32,
    /// Player-relative number within the game (1st, 2nd, 3rd matchup...).
    pub player_at_bat_number: u32,
    pub game_date: Option<NaiveDate>,
    pub pitch_count: usize,
    pub balls: u32,
    pub strikes: u32,
    pub outcome: Option<String>,
    /// Set when the at-bat fell back to an identity-unchecked lookup.
    pub unverified: bool,
    pub pitches: Vec<AnnotatedPitch>,
}

/// Verified plate-appearance statistics for the matchup. Computed once per
/// request, never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchupSummary {
    pub plate_appearances: u32,
    pub at_bats: u32,
    pub hits: u32,
    pub singles: u32,
    pub doubles: u32,
    pub triples: u32,
    pub home_runs: u32,
    pub strikeouts: u32,
    pub walks: u32,
    pub sac_flies: u32,
    pub total_bases: u32,
    /// Rate stats are None (not zero) when the denominator is zero.
    pub avg: Option<f64>,
    pub obp: Option<f64>,
    pub slg: Option<f64>,
    pub ops: Option<f64>,
    /// `at_bats + walks + sac_flies == plate_appearances`. Surfaced as a
    /// flag rather than thrown so partially-inconsistent data stays usable.
    pub consistent: bool,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub pitch_feed_base: String,
    pub play_index_base: String,
    pub max_concurrent_fetches: usize,
    pub request_budget_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let pitch_feed_base = std::env::var("PITCH_FEED_BASE")
            .unwrap_or_else(|_| "https://baseballsavant.mlb.com".to_string());

        let play_index_base = std::env::var("PLAY_INDEX_BASE")
            .unwrap_or_else(|_| "https://statsapi.mlb.com".to_string());

        let max_concurrent_fetches = std::env::var("MAX_CONCURRENT_FETCHES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let request_budget_secs = std::env::var("REQUEST_BUDGET_SECS")
            .unwrap_or_else(|_| "45".to_string())
            .parse()
            .unwrap_or(45);

        Ok(Self {
            port,
            pitch_feed_base,
            play_index_base,
            max_concurrent_fetches,
            request_budget_secs,
        })
    }
}
