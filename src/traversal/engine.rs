//! The frontier expansion loop.
//!
//! Levels are strictly sequential: level `k + 1` is only built once every
//! account of level `k` has a neighbour list (cached, fetched, or degraded to
//! empty) and every fetched list has been written to the cache. Within a
//! level, cache misses are fetched concurrently up to the configured bound.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::{Chain, Finding, TraversalOutcome, TraversalStats};
use crate::client::{FetchResult, RateLimitedClient};
use crate::db::CacheStore;
use crate::detector::TargetDetector;
use crate::error::{DegreesError, Result};
use crate::observability::FAILURES;
use crate::steam::SteamApi;
use crate::types::{SteamId, Visibility};

/// Back-to-back cache failures tolerated before the run is aborted.
pub const MAX_CONSECUTIVE_STORAGE_FAILURES: usize = 8;

/// Knobs that shape one traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalOptions {
    pub max_depth: u32,
    pub simultaneous_requests: usize,
    /// Treat uncached accounts as dead ends instead of fetching them.
    pub cached_only: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 6,
            simultaneous_requests: 1,
            cached_only: false,
        }
    }
}

/// Breadth-first search from one root to the nearest target.
pub struct FrontierEngine<'a, A> {
    store: &'a CacheStore,
    client: &'a RateLimitedClient<A>,
    detector: TargetDetector<'a, A>,
    options: TraversalOptions,
    stats: TraversalStats,
    consecutive_storage_failures: usize,
}

impl<'a, A: SteamApi> FrontierEngine<'a, A> {
    pub fn new(
        store: &'a CacheStore,
        client: &'a RateLimitedClient<A>,
        detector: TargetDetector<'a, A>,
        options: TraversalOptions,
    ) -> Self {
        Self {
            store,
            client,
            detector,
            options,
            stats: TraversalStats::default(),
            consecutive_storage_failures: 0,
        }
    }

    pub fn stats(&self) -> TraversalStats {
        self.stats
    }

    pub fn detector(&self) -> &TargetDetector<'a, A> {
        &self.detector
    }

    /// Search outward from `root`.
    ///
    /// # Errors
    ///
    /// Only [`DegreesError::StorageUnavailable`]: per-account failures
    /// degrade that account to a dead end and never abort the run.
    pub async fn run(&mut self, root: SteamId) -> Result<TraversalOutcome> {
        self.stats = TraversalStats::default();
        self.consecutive_storage_failures = 0;

        if self.detector.is_target(root).await {
            info!("root account {root} is itself a target");
            return Ok(TraversalOutcome::Found(Finding {
                degree: 0,
                nearest: Chain {
                    target: root,
                    path: vec![root],
                },
                others: Vec::new(),
            }));
        }

        let mut visited: HashSet<SteamId> = HashSet::from([root]);
        let mut parents: HashMap<SteamId, SteamId> = HashMap::new();
        let mut frontier = vec![root];
        let mut level = 0u32;

        loop {
            if level >= self.options.max_depth {
                info!(
                    "depth limit {} reached with {} undiscovered-beyond account(s)",
                    self.options.max_depth,
                    frontier.len()
                );
                return Ok(TraversalOutcome::DepthLimitReached {
                    max_depth: self.options.max_depth,
                });
            }

            info!("level {level}: expanding {} account(s)", frontier.len());
            let lists = self.expand_level(&frontier).await?;
            self.stats.levels = level + 1;

            // Frontier is ascending, so the lowest-id parent claims each child.
            let mut candidates = Vec::new();
            for parent in &frontier {
                let Some(friends) = lists.get(parent) else {
                    continue;
                };
                for &friend in friends {
                    if visited.insert(friend) {
                        parents.insert(friend, *parent);
                        candidates.push(friend);
                    }
                }
            }
            candidates.sort_unstable();
            self.stats.discovered += candidates.len();

            if candidates.is_empty() {
                info!("level {} is empty; no target reachable", level + 1);
                return Ok(TraversalOutcome::Exhausted { depth: level + 1 });
            }

            debug!(
                "level {}: checking {} new account(s) for targets",
                level + 1,
                candidates.len()
            );
            let mut found = Vec::new();
            for &candidate in &candidates {
                if self.detector.is_target(candidate).await {
                    info!("found target {candidate} at depth {}", level + 1);
                    found.push(candidate);
                }
            }

            if let Some((&first, rest)) = found.split_first() {
                let chain = |target| Chain {
                    target,
                    path: chain_to(root, target, &parents),
                };
                return Ok(TraversalOutcome::Found(Finding {
                    degree: level + 1,
                    nearest: chain(first),
                    others: rest.iter().map(|&t| chain(t)).collect(),
                }));
            }

            frontier = candidates;
            level += 1;
        }
    }

    /// Resolve a neighbour list for every account of the frontier.
    async fn expand_level(&mut self, frontier: &[SteamId]) -> Result<HashMap<SteamId, Vec<SteamId>>> {
        let mut lists = HashMap::with_capacity(frontier.len());
        let mut misses = Vec::new();

        for &account in frontier {
            match self.store.get_friends(account) {
                Ok(Some(friends)) => {
                    self.storage_succeeded();
                    self.stats.cache_hits += 1;
                    lists.insert(account, friends);
                }
                Ok(None) => misses.push(account),
                Err(e) => {
                    self.storage_failed(account, &e)?;
                    misses.push(account);
                }
            }
        }
        self.stats.cache_misses += misses.len();
        self.stats.expanded += frontier.len();
        debug!(
            "{} cached, {} to fetch",
            frontier.len() - misses.len(),
            misses.len()
        );

        if self.options.cached_only {
            for account in misses {
                debug!("{account} is not cached; skipping (cached-only)");
                self.stats.skipped_uncached += 1;
                lists.insert(account, Vec::new());
            }
            return Ok(lists);
        }

        let client = self.client;
        let mut fetches = stream::iter(misses)
            .map(|account| async move { (account, client.fetch_friends(account).await) })
            .buffer_unordered(self.options.simultaneous_requests.max(1));

        while let Some((account, result)) = fetches.next().await {
            let friends = match result {
                FetchResult::Friends(friends) => {
                    self.persist(account, &friends, Visibility::Public)?;
                    friends
                }
                FetchResult::Empty => {
                    debug!("{account} has a private or missing profile");
                    self.stats.private_profiles += 1;
                    self.persist(account, &[], Visibility::Private)?;
                    Vec::new()
                }
                FetchResult::Failed(kind) => {
                    // Not cached, so a later run will try again.
                    warn!(
                        target: FAILURES,
                        "could not fetch friends of {account} ({kind}); treating as dead end"
                    );
                    self.stats.fetch_failures += 1;
                    Vec::new()
                }
            };
            lists.insert(account, friends);
        }

        Ok(lists)
    }

    fn persist(&mut self, account: SteamId, friends: &[SteamId], visibility: Visibility) -> Result<()> {
        match self.store.put_friends(account, friends, visibility) {
            Ok(()) => {
                self.storage_succeeded();
                Ok(())
            }
            Err(e) => self.storage_failed(account, &e),
        }
    }

    fn storage_succeeded(&mut self) {
        self.consecutive_storage_failures = 0;
    }

    fn storage_failed(&mut self, account: SteamId, err: &DegreesError) -> Result<()> {
        self.stats.storage_failures += 1;
        self.consecutive_storage_failures += 1;
        error!(
            "cache store failed for {account} ({}/{}): {err}",
            self.consecutive_storage_failures, MAX_CONSECUTIVE_STORAGE_FAILURES
        );
        if self.consecutive_storage_failures >= MAX_CONSECUTIVE_STORAGE_FAILURES {
            return Err(DegreesError::StorageUnavailable {
                failures: self.consecutive_storage_failures,
            });
        }
        Ok(())
    }
}

/// Walk first-discovery parents from `target` back to `root`.
fn chain_to(root: SteamId, target: SteamId, parents: &HashMap<SteamId, SteamId>) -> Vec<SteamId> {
    let mut path = vec![target];
    let mut current = target;
    while current != root {
        match parents.get(&current) {
            Some(&parent) => {
                path.push(parent);
                current = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RateLimiter, RetryPolicy};
    use crate::steam::memory::MemorySteam;
    use crate::steam::ApiError;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const ROOT: u64 = 1;
    const TARGET: u64 = 99;

    fn client(api: MemorySteam) -> RateLimitedClient<MemorySteam> {
        RateLimitedClient::new(
            api,
            RateLimiter::new(std::time::Duration::ZERO, 1),
            RetryPolicy::immediate(2, 0),
        )
    }

    fn options(max_depth: u32) -> TraversalOptions {
        TraversalOptions {
            max_depth,
            ..TraversalOptions::default()
        }
    }

    async fn run(
        api: MemorySteam,
        store: &CacheStore,
        max_depth: u32,
    ) -> (Result<TraversalOutcome>, TraversalStats, RateLimitedClient<MemorySteam>) {
        let client = client(api);
        let (outcome, stats) = {
            let detector = TargetDetector::new([SteamId(TARGET)], &client, store);
            let mut engine = FrontierEngine::new(store, &client, detector, options(max_depth));
            let outcome = engine.run(SteamId(ROOT)).await;
            (outcome, engine.stats())
        };
        (outcome, stats, client)
    }

    /// root → {2, 3}; 2 → {4, TARGET}; 3 → {4}
    fn diamond() -> MemorySteam {
        MemorySteam::new()
            .with_friends(ROOT, &[2, 3])
            .with_friends(2, &[4, TARGET])
            .with_friends(3, &[4])
            .with_friends(4, &[])
    }

    #[tokio::test]
    async fn root_target_is_degree_zero_without_fetching() {
        let store = CacheStore::open(":memory:").unwrap();
        let client = client(MemorySteam::new());
        let detector = TargetDetector::new([SteamId(ROOT)], &client, &store);
        let mut engine = FrontierEngine::new(&store, &client, detector, options(3));
        let outcome = engine.run(SteamId(ROOT)).await.unwrap();

        let TraversalOutcome::Found(finding) = outcome else {
            panic!("expected Found, got {outcome:?}");
        };
        assert_eq!(finding.degree, 0);
        assert_eq!(finding.nearest.path, vec![SteamId(ROOT)]);
        assert_eq!(client.api().total_friend_calls(), 0);
    }

    #[tokio::test]
    async fn diamond_discovers_shared_friend_once() {
        let store = CacheStore::open(":memory:").unwrap();
        let (outcome, stats, client) = run(diamond(), &store, 2).await;

        let TraversalOutcome::Found(finding) = outcome.unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(finding.degree, 2);
        assert_eq!(finding.nearest.target, SteamId(TARGET));
        assert_eq!(
            finding.nearest.path,
            vec![SteamId(ROOT), SteamId(2), SteamId(TARGET)]
        );
        // 2, 3 at level 1; 4 and TARGET at level 2: account 4 counted once.
        assert_eq!(stats.discovered, 4);
        // Level-2 accounts are detected, never expanded.
        assert_eq!(client.api().friend_calls(SteamId(4)), 0);
    }

    #[tokio::test]
    async fn depth_limit_stops_before_expanding_last_level() {
        let store = CacheStore::open(":memory:").unwrap();
        let (outcome, _, client) = run(diamond(), &store, 1).await;
        assert_eq!(
            outcome.unwrap(),
            TraversalOutcome::DepthLimitReached { max_depth: 1 }
        );
        assert_eq!(client.api().friend_calls(SteamId(2)), 0);
        assert_eq!(client.api().friend_calls(SteamId(3)), 0);
    }

    #[tokio::test]
    async fn empty_component_is_exhausted() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new()
            .with_friends(ROOT, &[2])
            .with_friends(2, &[ROOT]);
        let (outcome, _, _) = run(api, &store, 6).await;
        assert_eq!(outcome.unwrap(), TraversalOutcome::Exhausted { depth: 2 });
    }

    #[tokio::test]
    async fn transient_failures_within_bound_then_empty_list() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new()
            .with_friends(ROOT, &[])
            .with_failures(ROOT, &[ApiError::NetworkFailure, ApiError::NetworkFailure]);
        let (outcome, _, client) = run(api, &store, 3).await;
        assert_eq!(outcome.unwrap(), TraversalOutcome::Exhausted { depth: 1 });
        assert_eq!(client.api().friend_calls(SteamId(ROOT)), 3);
    }

    #[tokio::test]
    async fn private_profile_is_a_dead_end_not_an_error() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new()
            .with_friends(ROOT, &[2, 3])
            .with_private(2)
            .with_friends(3, &[TARGET]);
        let (outcome, stats, _) = run(api, &store, 3).await;
        assert!(matches!(outcome.unwrap(), TraversalOutcome::Found(f) if f.degree == 2));
        assert_eq!(stats.private_profiles, 1);
        assert_eq!(
            store.get_friend_list(SteamId(2)).unwrap().unwrap().visibility,
            Visibility::Private
        );
    }

    #[tokio::test]
    async fn exhausted_fetch_failure_is_not_cached() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new().with_friends(ROOT, &[2]).with_failures(
            2,
            &[ApiError::NetworkFailure, ApiError::NetworkFailure, ApiError::NetworkFailure],
        );
        let (outcome, stats, _) = run(api, &store, 3).await;
        assert_eq!(outcome.unwrap(), TraversalOutcome::Exhausted { depth: 2 });
        assert_eq!(stats.fetch_failures, 1);
        assert_eq!(store.get_friends(SteamId(2)).unwrap(), None);
    }

    #[tokio::test]
    async fn several_targets_at_one_level_report_lowest_id() {
        let store = CacheStore::open(":memory:").unwrap();
        let client = client(
            MemorySteam::new()
                .with_friends(ROOT, &[2, 3])
                .with_friends(2, &[60])
                .with_friends(3, &[50]),
        );
        let detector = TargetDetector::new([SteamId(50), SteamId(60)], &client, &store);
        let mut engine = FrontierEngine::new(&store, &client, detector, options(4));
        let TraversalOutcome::Found(finding) = engine.run(SteamId(ROOT)).await.unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(finding.nearest.target, SteamId(50));
        assert_eq!(finding.nearest.path, vec![SteamId(ROOT), SteamId(3), SteamId(50)]);
        assert_eq!(finding.others.len(), 1);
        assert_eq!(finding.others[0].target, SteamId(60));
    }

    #[tokio::test]
    async fn cycles_terminate() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new()
            .with_friends(ROOT, &[2])
            .with_friends(2, &[3, ROOT])
            .with_friends(3, &[ROOT, 2]);
        let (outcome, _, _) = run(api, &store, 10).await;
        assert_eq!(outcome.unwrap(), TraversalOutcome::Exhausted { depth: 3 });
    }

    #[tokio::test]
    async fn cached_only_treats_misses_as_dead_ends() {
        let store = CacheStore::open(":memory:").unwrap();
        store
            .put_friends(SteamId(ROOT), &[SteamId(2)], Visibility::Public)
            .unwrap();
        let client = client(diamond());
        let detector = TargetDetector::new([SteamId(TARGET)], &client, &store);
        let mut engine = FrontierEngine::new(
            &store,
            &client,
            detector,
            TraversalOptions {
                max_depth: 5,
                simultaneous_requests: 1,
                cached_only: true,
            },
        );
        let outcome = engine.run(SteamId(ROOT)).await.unwrap();
        assert_eq!(outcome, TraversalOutcome::Exhausted { depth: 2 });
        assert_eq!(engine.stats().skipped_uncached, 1);
        assert_eq!(client.api().total_friend_calls(), 0);
    }

    #[tokio::test]
    async fn persistent_storage_failure_is_fatal() {
        let store = CacheStore::open(":memory:").unwrap();
        store.conn.pragma_update(None, "query_only", true).unwrap();
        let friends: Vec<u64> = (2..20).collect();
        let mut api = MemorySteam::new().with_friends(ROOT, &friends);
        for id in 2..20 {
            api = api.with_friends(id, &[]);
        }
        let (outcome, _, _) = run(api, &store, 5).await;
        assert!(matches!(
            outcome,
            Err(DegreesError::StorageUnavailable { failures }) if failures == MAX_CONSECUTIVE_STORAGE_FAILURES
        ));
    }

    #[tokio::test]
    async fn isolated_storage_failure_is_not_fatal() {
        let store = CacheStore::open(":memory:").unwrap();
        store.conn.pragma_update(None, "query_only", true).unwrap();
        let (outcome, stats, _) = run(diamond(), &store, 2).await;
        assert!(matches!(outcome.unwrap(), TraversalOutcome::Found(f) if f.degree == 2));
        assert_eq!(stats.storage_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_stay_bounded_and_spaced() {
        let store = CacheStore::open(":memory:").unwrap();
        let api = MemorySteam::new()
            .with_friends(ROOT, &[2, 3, 4, 5])
            .with_friends(2, &[])
            .with_friends(3, &[])
            .with_friends(4, &[])
            .with_friends(5, &[])
            .with_friend_latency(Duration::from_secs(10));
        let client = RateLimitedClient::new(
            api,
            RateLimiter::new(Duration::from_secs(1), 2),
            RetryPolicy::immediate(0, 0),
        );
        let detector = TargetDetector::new([SteamId(TARGET)], &client, &store);
        let options = TraversalOptions {
            max_depth: 4,
            simultaneous_requests: 2,
            cached_only: false,
        };
        let mut engine = FrontierEngine::new(&store, &client, detector, options);

        let start = tokio::time::Instant::now();
        let outcome = engine.run(SteamId(ROOT)).await.unwrap();
        assert_eq!(outcome, TraversalOutcome::Exhausted { depth: 2 });

        let api = client.api();
        assert_eq!(api.total_friend_calls(), 5);
        assert_eq!(api.max_friends_in_flight(), 2);
        let starts = api.friend_call_starts();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        // Root ends at 10s and level 1 runs two at a time: four 10s calls
        // in two waves, each start at least a second after the last end.
        assert!(start.elapsed() >= Duration::from_secs(33));
        assert_eq!(client.limiter().in_flight(), 0);
    }

    #[test]
    fn chain_walks_parents_back_to_root() {
        let parents = HashMap::from([
            (SteamId(3), SteamId(2)),
            (SteamId(2), SteamId(1)),
        ]);
        assert_eq!(
            chain_to(SteamId(1), SteamId(3), &parents),
            vec![SteamId(1), SteamId(2), SteamId(3)]
        );
    }
}
