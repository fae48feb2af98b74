//! Caller-facing engine: cross-source reconciliation and aggregation for one
//! player/opponent matchup request.
//!
//! Request-scoped parallel fetch, then sequential process: the only
//! concurrency is the play-index prefetch fan-out; matching and aggregation
//! run single-threaded over already-fetched data.

use chrono::{Datelike, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::cache::PlayIndexCache;
use crate::feeds::pitch_feed::PitchFeed;
use crate::guard;
use crate::matching;
use crate::models::{AnnotatedAtBat, AtBatGroup, MatchupSummary, PitchRecord, Role};

/// Earliest season the pitch feed carries usable data for.
const FIRST_TRACKED_SEASON: i32 = 2015;

/// Request-level failures. At-bat-level issues never appear here; they stay
/// inline on the result (null identifiers, unverified tags, the consistency
/// flag).
#[derive(Debug)]
pub enum MatchupError {
    DatasetTooLarge { rows: usize, max_rows: usize },
    NoDataFound { detail: String },
    InvalidRequest(String),
    Fetch(anyhow::Error),
}

impl std::fmt::Display for MatchupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DatasetTooLarge { rows, max_rows } => write!(
                f,
                "too much data to process ({} rows, limit {}); please select fewer seasons",
                rows, max_rows
            ),
            Self::NoDataFound { detail } => write!(f, "no matchup data found: {}", detail),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            Self::Fetch(err) => write!(f, "upstream fetch failed: {}", err),
        }
    }
}

impl std::error::Error for MatchupError {}

#[derive(Debug, Clone)]
pub struct MatchupRequest {
    pub player_id: u64,
    pub opponent_id: u64,
    pub role: Role,
    pub seasons: Vec<i32>,
}

/// Annotated timeline plus verified aggregate statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MatchupResult {
    pub player_id: u64,
    pub opponent_id: u64,
    pub role: Role,
    pub at_bats: Vec<AnnotatedAtBat>,
    pub summary: MatchupSummary,
}

pub struct MatchupEngine {
    pitch_feed: Arc<dyn PitchFeed>,
    play_index: Arc<PlayIndexCache>,
    request_budget: Duration,
    seasons_cache: RwLock<HashMap<(u64, u64, Role), Vec<i32>>>,
}

impl MatchupEngine {
    pub fn new(
        pitch_feed: Arc<dyn PitchFeed>,
        play_index: Arc<PlayIndexCache>,
        request_budget: Duration,
    ) -> Self {
        Self {
            pitch_feed,
            play_index,
            request_budget,
            seasons_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Compute the full matchup: fetch, guard, reconcile, aggregate.
    pub async fn compute_matchup(
        &self,
        req: &MatchupRequest,
    ) -> Result<MatchupResult, MatchupError> {
        if req.seasons.is_empty() {
            return Err(MatchupError::InvalidRequest(
                "at least one season is required".to_string(),
            ));
        }

        let min_season = *req.seasons.iter().min().unwrap_or(&FIRST_TRACKED_SEASON);
        let max_season = *req.seasons.iter().max().unwrap_or(&FIRST_TRACKED_SEASON);
        let (start, end) = season_window(min_season, max_season);

        let records = self
            .pitch_feed
            .fetch_pitch_records(req.player_id, req.role, start, end)
            .await
            .map_err(MatchupError::Fetch)?;

        // Before any grouping or matching touches the rows
        guard::check_dataset_size(records.len())?;

        let filtered = filter_to_matchup(records, req.opponent_id, req.role);
        if filtered.is_empty() {
            return Err(MatchupError::NoDataFound {
                detail: format!(
                    "player {} has no regular season at-bats vs {} in the selected seasons",
                    req.player_id, req.opponent_id
                ),
            });
        }

        let groups = aggregate::dedupe_groups(AtBatGroup::group(filtered));
        info!(
            player_id = req.player_id,
            opponent_id = req.opponent_id,
            role = req.role.as_str(),
            at_bats = groups.len(),
            "Reconciling matchup"
        );

        let mut game_ids: Vec<u64> = groups.iter().map(|g| g.game_id).collect();
        game_ids.dedup();
        self.play_index
            .prefetch(&game_ids, self.request_budget)
            .await;

        let mut per_game_counter: HashMap<u64, u32> = HashMap::new();
        let mut at_bats = Vec::with_capacity(groups.len());
        let mut unresolved_pitches = 0usize;
        for group in &groups {
            let index = self.play_index.cached(group.game_id);
            let mut annotated = matching::annotate_group(group, index.as_deref());

            let counter = per_game_counter.entry(group.game_id).or_insert(0);
            *counter += 1;
            annotated.player_at_bat_number = *counter;

            unresolved_pitches += annotated
                .pitches
                .iter()
                .filter(|p| p.play_id.is_none())
                .count();
            at_bats.push(annotated);
        }

        if unresolved_pitches > 0 {
            warn!(
                unresolved_pitches,
                games = game_ids.len(),
                "Some pitches have no play identifier"
            );
        }

        let summary = aggregate::summarize(&groups);
        if !summary.consistent {
            warn!(
                plate_appearances = summary.plate_appearances,
                at_bats = summary.at_bats,
                walks = summary.walks,
                sac_flies = summary.sac_flies,
                "PA identity check failed; summary flagged inconsistent"
            );
        }

        Ok(MatchupResult {
            player_id: req.player_id,
            opponent_id: req.opponent_id,
            role: req.role,
            at_bats,
            summary,
        })
    }

    /// Seasons with matchup data for a player vs opponent, memoized per
    /// (player, opponent, role). Empty results are cached too.
    pub async fn available_seasons(
        &self,
        player_id: u64,
        opponent_id: u64,
        role: Role,
    ) -> Result<Vec<i32>, MatchupError> {
        let key = (player_id, opponent_id, role);
        if let Some(hit) = self.seasons_cache.read().get(&key) {
            return Ok(hit.clone());
        }

        let current_year = Utc::now().year();
        let (start, end) = season_window(FIRST_TRACKED_SEASON, current_year);

        let records = self
            .pitch_feed
            .fetch_pitch_records(player_id, role, start, end)
            .await
            .map_err(MatchupError::Fetch)?;

        let filtered = filter_to_matchup(records, opponent_id, role);
        let mut seasons: Vec<i32> = filtered
            .iter()
            .filter_map(|r| r.game_date.map(|d| d.year()))
            .filter(|y| (FIRST_TRACKED_SEASON..=current_year).contains(y))
            .collect();
        seasons.sort_unstable();
        seasons.dedup();

        debug!(player_id, opponent_id, seasons = ?seasons, "Resolved available seasons");
        self.seasons_cache.write().insert(key, seasons.clone());
        Ok(seasons)
    }

    /// Shared cache handle, exposed for observability.
    pub fn play_index_cache(&self) -> &Arc<PlayIndexCache> {
        &self.play_index
    }
}

/// Season range -> fetch window: opening day buffer through the end of the
/// postseason.
fn season_window(min_season: i32, max_season: i32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(min_season, 3, 1).unwrap_or_default();
    let end = NaiveDate::from_ymd_opt(max_season, 11, 30).unwrap_or_default();
    (start, end)
}

/// Keep only rows against the requested opponent in regular season games.
/// Rows without a game-type marker are kept; some exports omit the column.
fn filter_to_matchup(records: Vec<PitchRecord>, opponent_id: u64, role: Role) -> Vec<PitchRecord> {
    records
        .into_iter()
        .filter(|r| match role {
            Role::Batter => r.pitcher_id == opponent_id,
            Role::Pitcher => r.batter_id == opponent_id,
        })
        .filter(|r| r.game_type.as_deref().map_or(true, |t| t == "R"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::play_index::{PlayIndexFeed, RawGameFeed};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StaticPitchFeed {
        records: Vec<PitchRecord>,
        calls: AtomicU64,
    }

    impl StaticPitchFeed {
        fn new(records: Vec<PitchRecord>) -> Self {
            Self {
                records,
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl PitchFeed for StaticPitchFeed {
        async fn fetch_pitch_records(
            &self,
            _player_id: u64,
            _role: Role,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PitchRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }
    }

    struct EmptyPlayIndexFeed;

    #[async_trait]
    impl PlayIndexFeed for EmptyPlayIndexFeed {
        async fn fetch_game_plays(&self, _game_id: u64) -> Result<RawGameFeed> {
            Ok(RawGameFeed::default())
        }
    }

    struct SingleGameFeed;

    #[async_trait]
    impl PlayIndexFeed for SingleGameFeed {
        async fn fetch_game_plays(&self, _game_id: u64) -> Result<RawGameFeed> {
            Ok(serde_json::from_value(json!({
                "gameData": { "datetime": { "originalDate": "2024-06-09" } },
                "liveData": { "plays": { "allPlays": [
                    {
                        "about": { "atBatIndex": 12 },
                        "matchup": { "batter": { "id": 10 }, "pitcher": { "id": 20 } },
                        "playEvents": [
                            { "isPitch": true, "pitchNumber": 1, "index": 0, "playId": "uuid-1" },
                            { "isPitch": true, "pitchNumber": 2, "index": 1, "playId": "uuid-2" }
                        ]
                    }
                ] } }
            }))
            .unwrap())
        }
    }

    fn pitch(game_id: u64, ab: u32, num: u32, event: Option<&str>) -> PitchRecord {
        PitchRecord {
            game_id,
            at_bat_number: ab,
            pitch_number: num,
            batter_id: 10,
            pitcher_id: 20,
            game_date: NaiveDate::from_ymd_opt(2024, 6, 9),
            game_type: Some("R".to_string()),
            description: None,
            event: event.map(str::to_string),
            call: Some(if event.is_some() { "X" } else { "S" }.to_string()),
            balls: None,
            strikes: None,
            pitch_type: None,
            plate_x: None,
            plate_z: None,
            release_speed: None,
            release_spin_rate: None,
            spin_axis: None,
            pfx_x: None,
            pfx_z: None,
            launch_speed: None,
            launch_angle: None,
            launch_spin_rate: None,
            hit_distance: None,
        }
    }

    fn engine_with(
        records: Vec<PitchRecord>,
        play_feed: Arc<dyn PlayIndexFeed>,
    ) -> MatchupEngine {
        MatchupEngine::new(
            Arc::new(StaticPitchFeed::new(records)),
            Arc::new(PlayIndexCache::new(play_feed, 10)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_empty_seasons_rejected() {
        let engine = engine_with(vec![], Arc::new(EmptyPlayIndexFeed));
        let req = MatchupRequest {
            player_id: 10,
            opponent_id: 20,
            role: Role::Batter,
            seasons: vec![],
        };
        match engine.compute_matchup(&req).await {
            Err(MatchupError::InvalidRequest(_)) => {}
            other => panic!("expected InvalidRequest, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_no_data_after_filtering() {
        // Opponent id 99 never appears
        let engine = engine_with(
            vec![pitch(1, 1, 1, Some("single"))],
            Arc::new(EmptyPlayIndexFeed),
        );
        let req = MatchupRequest {
            player_id: 10,
            opponent_id: 99,
            role: Role::Batter,
            seasons: vec![2024],
        };
        match engine.compute_matchup(&req).await {
            Err(MatchupError::NoDataFound { .. }) => {}
            other => panic!("expected NoDataFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_happy_path_annotates_and_aggregates() {
        let records = vec![
            pitch(717465, 12, 1, None),
            pitch(717465, 12, 2, Some("home_run")),
        ];
        let engine = engine_with(records, Arc::new(SingleGameFeed));
        let req = MatchupRequest {
            player_id: 10,
            opponent_id: 20,
            role: Role::Batter,
            seasons: vec![2024],
        };

        let result = engine.compute_matchup(&req).await.unwrap();
        assert_eq!(result.at_bats.len(), 1);

        let ab = &result.at_bats[0];
        assert_eq!(ab.player_at_bat_number, 1);
        assert_eq!(ab.outcome.as_deref(), Some("home_run"));
        assert!(!ab.unverified);
        assert_eq!(ab.game_date, NaiveDate::from_ymd_opt(2024, 6, 9));
        assert_eq!(ab.pitches[0].play_id.as_deref(), Some("uuid-1"));
        assert_eq!(ab.pitches[1].play_id.as_deref(), Some("uuid-2"));

        assert_eq!(result.summary.plate_appearances, 1);
        assert_eq!(result.summary.home_runs, 1);
        assert_eq!(result.summary.avg, Some(1.0));
        assert!(result.summary.consistent);
    }

    #[tokio::test]
    async fn test_unresolved_game_is_partial_not_fatal() {
        let records = vec![pitch(5, 3, 1, Some("strikeout"))];
        let engine = engine_with(records, Arc::new(EmptyPlayIndexFeed));
        let req = MatchupRequest {
            player_id: 10,
            opponent_id: 20,
            role: Role::Batter,
            seasons: vec![2024],
        };

        let result = engine.compute_matchup(&req).await.unwrap();
        assert_eq!(result.at_bats.len(), 1);
        assert_eq!(result.at_bats[0].pitches[0].play_id, None);
        // Aggregation still ran over the unresolved at-bat
        assert_eq!(result.summary.strikeouts, 1);
    }

    #[tokio::test]
    async fn test_spring_training_rows_excluded() {
        let mut exhibition = pitch(6, 1, 1, Some("single"));
        exhibition.game_type = Some("S".to_string());
        let engine = engine_with(vec![exhibition], Arc::new(EmptyPlayIndexFeed));
        let req = MatchupRequest {
            player_id: 10,
            opponent_id: 20,
            role: Role::Batter,
            seasons: vec![2024],
        };
        assert!(matches!(
            engine.compute_matchup(&req).await,
            Err(MatchupError::NoDataFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_available_seasons_cached() {
        let mut records = vec![pitch(1, 1, 1, Some("single"))];
        let mut older = pitch(2, 1, 1, Some("walk"));
        older.game_date = NaiveDate::from_ymd_opt(2022, 8, 1);
        records.push(older);

        let feed = Arc::new(StaticPitchFeed::new(records));
        let engine = MatchupEngine::new(
            feed.clone(),
            Arc::new(PlayIndexCache::new(Arc::new(EmptyPlayIndexFeed), 10)),
            Duration::from_secs(5),
        );

        let seasons = engine.available_seasons(10, 20, Role::Batter).await.unwrap();
        assert_eq!(seasons, vec![2022, 2024]);

        let again = engine.available_seasons(10, 20, Role::Batter).await.unwrap();
        assert_eq!(again, seasons);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }
}
