//! Target-set membership.
//!
//! An account is a target when it is one of the configured ids, or when its
//! profile shows the configured badge. Badge verdicts are cached in the
//! profiles table and trusted for `badge_ttl`; older or missing verdicts are
//! re-checked against Steam. Each account is evaluated at most once per run.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::client::RateLimitedClient;
use crate::db::CacheStore;
use crate::observability::FAILURES;
use crate::steam::SteamApi;
use crate::types::SteamId;

/// Counters for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub evaluated: usize,
    pub cached_verdicts: usize,
    pub badge_lookups: usize,
    pub lookup_failures: usize,
}

/// Decides whether an account belongs to the target set.
pub struct TargetDetector<'a, A> {
    targets: HashSet<SteamId>,
    badge_id: Option<u32>,
    badge_ttl: Duration,
    /// Never call Steam; use cached verdicts only.
    cached_only: bool,
    client: &'a RateLimitedClient<A>,
    store: &'a CacheStore,
    verdicts: HashMap<SteamId, bool>,
    stats: DetectorStats,
}

impl<'a, A: SteamApi> TargetDetector<'a, A> {
    pub fn new(
        targets: impl IntoIterator<Item = SteamId>,
        client: &'a RateLimitedClient<A>,
        store: &'a CacheStore,
    ) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            badge_id: None,
            badge_ttl: Duration::days(7),
            cached_only: false,
            client,
            store,
            verdicts: HashMap::new(),
            stats: DetectorStats::default(),
        }
    }

    /// Also treat holders of `badge_id` as targets.
    pub fn with_badge(mut self, badge_id: u32, ttl: Duration) -> Self {
        self.badge_id = Some(badge_id);
        self.badge_ttl = ttl;
        self
    }

    pub fn cached_only(mut self, cached_only: bool) -> Self {
        self.cached_only = cached_only;
        self
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }

    /// Whether `steam_id` was configured as an explicit target.
    pub fn is_explicit_target(&self, steam_id: SteamId) -> bool {
        self.targets.contains(&steam_id)
    }

    /// Membership test. Memoised for the lifetime of the detector.
    pub async fn is_target(&mut self, steam_id: SteamId) -> bool {
        if let Some(&verdict) = self.verdicts.get(&steam_id) {
            return verdict;
        }
        self.stats.evaluated += 1;
        let verdict = self.evaluate(steam_id).await;
        self.verdicts.insert(steam_id, verdict);
        verdict
    }

    async fn evaluate(&mut self, steam_id: SteamId) -> bool {
        if self.targets.contains(&steam_id) {
            return true;
        }
        let Some(badge_id) = self.badge_id else {
            return false;
        };

        match self.store.get_profile(steam_id) {
            Ok(Some(record)) => {
                if let (Some(flag), Some(checked_at)) = (record.is_target, record.checked_at) {
                    if Utc::now() - checked_at <= self.badge_ttl {
                        self.stats.cached_verdicts += 1;
                        return flag;
                    }
                    debug!("cached badge verdict for {steam_id} is stale, re-checking");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: FAILURES, "could not read cached profile for {steam_id}: {e}")
            }
        }

        if self.cached_only {
            debug!("no fresh badge verdict for {steam_id} in cache, assuming non-target");
            return false;
        }

        self.stats.badge_lookups += 1;
        match self.client.fetch_badges(steam_id).await {
            Ok(badges) => {
                let flag = badges.contains(&badge_id);
                if let Err(e) = self.store.record_target_flag(steam_id, flag, Utc::now()) {
                    warn!(target: FAILURES, "could not cache badge verdict for {steam_id}: {e}");
                }
                flag
            }
            Err(e) => {
                self.stats.lookup_failures += 1;
                warn!(
                    target: FAILURES,
                    "badge lookup for {steam_id} failed ({e}); treating as non-target"
                );
                false
            }
        }
    }
}
