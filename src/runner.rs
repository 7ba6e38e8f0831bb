//! Wires configuration, cache, client, detector and engine into one search.

use std::collections::HashMap;

use tracing::info;

use crate::client::{ClientStatsSnapshot, RateLimitedClient};
use crate::config::RunConfig;
use crate::db::CacheStore;
use crate::detector::{DetectorStats, TargetDetector};
use crate::error::{DegreesError, Result};
use crate::report::resolve_profiles;
use crate::steam::SteamApi;
use crate::traversal::{FrontierEngine, TraversalOptions, TraversalOutcome, TraversalStats};
use crate::types::{SteamId, SteamProfile};

// Process exit codes.
pub const EXIT_FOUND: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DEPTH_LIMIT: u8 = 2;
pub const EXIT_EXHAUSTED: u8 = 3;
pub const EXIT_STORAGE: u8 = 4;
pub const EXIT_CONFIG: u8 = 64;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Everything a finished search produced.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcome: TraversalOutcome,
    /// Display profiles for every account on a reported chain.
    pub profiles: HashMap<SteamId, SteamProfile>,
    pub traversal: TraversalStats,
    pub detector: DetectorStats,
    pub client: ClientStatsSnapshot,
}

impl SearchReport {
    pub fn exit_code(&self) -> u8 {
        outcome_exit_code(&self.outcome)
    }
}

pub fn outcome_exit_code(outcome: &TraversalOutcome) -> u8 {
    match outcome {
        TraversalOutcome::Found(_) => EXIT_FOUND,
        TraversalOutcome::DepthLimitReached { .. } => EXIT_DEPTH_LIMIT,
        TraversalOutcome::Exhausted { .. } => EXIT_EXHAUSTED,
    }
}

pub fn error_exit_code(err: &DegreesError) -> u8 {
    match err {
        DegreesError::Config(_) => EXIT_CONFIG,
        DegreesError::StorageUnavailable { .. } | DegreesError::Database(_) => EXIT_STORAGE,
        _ => EXIT_FAILURE,
    }
}

/// Run one search from `root` against `api`, caching into `store`.
pub async fn search<A: SteamApi>(
    config: &RunConfig,
    root: SteamId,
    store: &CacheStore,
    api: A,
) -> Result<SearchReport> {
    config.validate()?;
    let cached_only = config.cache.cached_only;
    let client = RateLimitedClient::from_config(api, &config.client);

    let mut detector = TargetDetector::new(config.targets.resolve()?, &client, store)
        .cached_only(cached_only.profiles());
    if let Some(badge_id) = config.targets.badge_id {
        detector = detector.with_badge(badge_id, config.targets.badge_ttl());
    }

    let options = TraversalOptions {
        max_depth: config.traversal.max_depth,
        simultaneous_requests: config.client.simultaneous_requests,
        cached_only: cached_only.friends(),
    };
    info!(
        "searching from {root} (max depth {}, {:?} between requests, {} in flight)",
        options.max_depth,
        config.client.request_delay(),
        options.simultaneous_requests
    );

    let (outcome, traversal, detector_stats) = {
        let mut engine = FrontierEngine::new(store, &client, detector, options);
        let outcome = engine.run(root).await?;
        (outcome, engine.stats(), engine.detector().stats())
    };

    let profiles = match &outcome {
        TraversalOutcome::Found(finding) => {
            let steam = (!cached_only.profiles()).then_some(&client);
            resolve_profiles(&finding.related_accounts(), store, steam).await
        }
        _ => HashMap::new(),
    };

    let client_stats = client.stats();
    info!(
        "done: {} level(s), {} expanded, {} cache hit(s), {} miss(es), {} request(s), {} failure(s)",
        traversal.levels,
        traversal.expanded,
        traversal.cache_hits,
        traversal.cache_misses,
        client_stats.requests,
        traversal.fetch_failures
    );

    Ok(SearchReport {
        outcome,
        profiles,
        traversal,
        detector: detector_stats,
        client: client_stats,
    })
}
