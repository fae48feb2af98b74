//! Caching & Concurrency Layer.
//!
//! Memoizes per-game play-index resolution (an expensive network fetch plus
//! transform) for the lifetime of the process. Completed games are immutable
//! upstream, so entries never need invalidation: the map is append-only.
//!
//! An explicit service object rather than a process-wide global, so its
//! lifetime and test-reset behavior are visible at the call site.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::feeds::play_index::PlayIndexFeed;
use crate::models::GamePlayIndex;
use crate::resolver::build_game_play_index;

/// Default ceiling on simultaneous upstream calls during a prefetch fan-out.
pub const MAX_CONCURRENT_FETCHES: usize = 10;

pub struct PlayIndexCache {
    feed: Arc<dyn PlayIndexFeed>,
    games: RwLock<HashMap<u64, Arc<GamePlayIndex>>>,
    /// Per-game guards so concurrent callers for the same uncached id wait
    /// for the first fetch instead of duplicating it. A lost race that
    /// recomputes is tolerated; the map write below is first-write-wins over
    /// identical immutable data either way. Entries are removed when their
    /// resolve finishes, succeeds or not, so the map never outgrows the set
    /// of resolves currently in progress.
    in_flight: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
    fetch_sem: Arc<Semaphore>,
    upstream_fetches: AtomicU64,
}

impl PlayIndexCache {
    pub fn new(feed: Arc<dyn PlayIndexFeed>, max_concurrent: usize) -> Self {
        Self {
            feed,
            games: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fetch_sem: Arc::new(Semaphore::new(max_concurrent.max(1))),
            upstream_fetches: AtomicU64::new(0),
        }
    }

    /// Cached index for a game, if resolution already happened. Matching runs
    /// over already-fetched data and never blocks, so it reads through here.
    pub fn cached(&self, game_id: u64) -> Option<Arc<GamePlayIndex>> {
        self.games.read().get(&game_id).cloned()
    }

    /// Resolve one game, fetching at most once per process under normal
    /// scheduling. A fetch failure is returned to the caller but not cached,
    /// so a later request may still succeed.
    pub async fn resolve(&self, game_id: u64) -> Result<Arc<GamePlayIndex>> {
        if let Some(hit) = self.cached(game_id) {
            return Ok(hit);
        }

        let key_guard = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .entry(game_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _held = key_guard.lock().await;
        // Removes the in-flight entry however this resolve ends: cache hit,
        // fetch error, or cancellation mid-await
        let _cleanup = InFlightCleanup {
            cache: self,
            game_id,
        };

        // Populated while we waited on the key guard
        if let Some(hit) = self.cached(game_id) {
            return Ok(hit);
        }

        let _permit = self
            .fetch_sem
            .acquire()
            .await
            .context("Fetch semaphore closed")?;

        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        debug!(game_id, "Fetching play index from upstream");

        let raw = self.feed.fetch_game_plays(game_id).await?;
        let index = Arc::new(build_game_play_index(game_id, &raw));

        let stored = {
            let mut games = self.games.write();
            games.entry(game_id).or_insert_with(|| index.clone()).clone()
        };
        Ok(stored)
    }

    /// Bounded parallel fan-out across the distinct games one request needs.
    ///
    /// Games still unresolved when the budget expires are left uncached and
    /// surface downstream as resolution misses, the same semantics as a
    /// per-game fetch failure. Partial results beat total failure.
    pub async fn prefetch(self: &Arc<Self>, game_ids: &[u64], budget: Duration) {
        let mut tasks = JoinSet::new();
        for &game_id in game_ids {
            if self.cached(game_id).is_some() {
                continue;
            }
            let cache = Arc::clone(self);
            tasks.spawn(async move {
                if let Err(e) = cache.resolve(game_id).await {
                    warn!(game_id, error = %e, "Play index fetch failed; at-bats in this game stay unresolved");
                }
            });
        }

        if tasks.is_empty() {
            return;
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(budget, drain).await.is_err() {
            warn!(
                budget_secs = budget.as_secs(),
                "Prefetch budget exhausted; unresolved games treated as misses"
            );
            tasks.abort_all();
        }
    }

    /// Number of upstream calls actually issued (cache misses).
    pub fn upstream_fetch_count(&self) -> u64 {
        self.upstream_fetches.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }
}

struct InFlightCleanup<'a> {
    cache: &'a PlayIndexCache,
    game_id: u64,
}

impl Drop for InFlightCleanup<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.lock().remove(&self.game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::play_index::RawGameFeed;
    use async_trait::async_trait;
    use serde_json::json;

    struct CountingFeed {
        calls: AtomicU64,
    }

    impl CountingFeed {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl PlayIndexFeed for CountingFeed {
        async fn fetch_game_plays(&self, _game_id: u64) -> Result<RawGameFeed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Simulate network latency so concurrent callers overlap
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(serde_json::from_value(json!({
                "liveData": { "plays": { "allPlays": [
                    {
                        "about": { "atBatIndex": 0 },
                        "matchup": { "batter": { "id": 1 }, "pitcher": { "id": 2 } },
                        "playEvents": [
                            { "isPitch": true, "pitchNumber": 1, "index": 0, "playId": "id-x" }
                        ]
                    }
                ] } }
            }))
            .unwrap())
        }
    }

    struct FailingFeed;

    #[async_trait]
    impl PlayIndexFeed for FailingFeed {
        async fn fetch_game_plays(&self, game_id: u64) -> Result<RawGameFeed> {
            Err(anyhow::anyhow!("upstream unavailable for game {}", game_id))
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolve_fetches_once() {
        let feed = Arc::new(CountingFeed::new());
        let cache = Arc::new(PlayIndexCache::new(feed.clone(), MAX_CONCURRENT_FETCHES));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.resolve(717465).await }));
        }

        let mut indexes = Vec::new();
        for handle in handles {
            indexes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.upstream_fetch_count(), 1);

        // Every caller got the same cached value
        for index in &indexes {
            assert!(Arc::ptr_eq(index, &indexes[0]));
        }
    }

    #[tokio::test]
    async fn test_prefetch_populates_distinct_games() {
        let feed = Arc::new(CountingFeed::new());
        let cache = Arc::new(PlayIndexCache::new(feed.clone(), 2));

        cache
            .prefetch(&[1, 2, 3, 2, 1], Duration::from_secs(5))
            .await;

        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
        assert!(cache.cached(1).is_some());
        assert!(cache.cached(2).is_some());
        assert!(cache.cached(3).is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_not_cached() {
        let cache = Arc::new(PlayIndexCache::new(Arc::new(FailingFeed), 4));

        cache.prefetch(&[42], Duration::from_secs(1)).await;
        assert!(cache.cached(42).is_none());

        // Direct resolution surfaces the error to the caller
        assert!(cache.resolve(42).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_resolves_release_in_flight_entries() {
        let cache = Arc::new(PlayIndexCache::new(Arc::new(FailingFeed), 4));

        for game_id in [7, 8, 9] {
            assert!(cache.resolve(game_id).await.is_err());
        }
        // Error paths must not strand per-key guards in the map
        assert_eq!(cache.in_flight_len(), 0);

        // Successful resolves clean up the same way
        let ok_cache = Arc::new(PlayIndexCache::new(Arc::new(CountingFeed::new()), 4));
        ok_cache.resolve(1).await.expect("resolve should succeed");
        assert_eq!(ok_cache.in_flight_len(), 0);
    }
}
