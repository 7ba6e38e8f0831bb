//! Rate-limited, retrying wrapper around a [`SteamApi`].
//!
//! Every call goes through one shared [`RateLimiter`]. Failures are retried
//! here and classified, so callers only ever see a [`FetchResult`] or a final
//! [`ApiError`], never a transport error.

pub mod limiter;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::observability::FAILURES;
use crate::steam::{ApiError, FriendsResponse, SteamApi, PLAYER_SUMMARIES_BATCH};
use crate::types::{SteamId, SteamProfile};

pub use limiter::{RateLimiter, RequestPermit};

/// First backoff after a network failure; doubles per attempt.
const NETWORK_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// FetchResult
// ---------------------------------------------------------------------------

/// Outcome of fetching one account's friend list, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// The list was readable. It may be empty.
    Friends(Vec<SteamId>),
    /// Private, deleted or unauthorized profile: no neighbours, not an error.
    Empty,
    /// Retries exhausted on a transient failure.
    Failed(ApiError),
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How many times, and how long to wait, before giving up on a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_network_retries: u32,
    pub network_backoff: Duration,
    pub max_rate_limit_retries: u32,
    pub rate_limit_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_network_retries: config.max_network_retries,
            network_backoff: NETWORK_BACKOFF,
            max_rate_limit_retries: config.max_rate_limit_retries,
            rate_limit_cooldown: config.rate_limit_cooldown(),
        }
    }

    /// No waiting between attempts; for tests and fakes.
    pub fn immediate(max_network_retries: u32, max_rate_limit_retries: u32) -> Self {
        Self {
            max_network_retries,
            network_backoff: Duration::ZERO,
            max_rate_limit_retries,
            rate_limit_cooldown: Duration::ZERO,
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(10))
}

// ---------------------------------------------------------------------------
// ClientStats
// ---------------------------------------------------------------------------

/// Counters for reporting.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

impl ClientStats {
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitedClient
// ---------------------------------------------------------------------------

/// The only path by which the crate talks to Steam.
#[derive(Debug)]
pub struct RateLimitedClient<A> {
    api: A,
    limiter: RateLimiter,
    policy: RetryPolicy,
    stats: ClientStats,
}

impl<A: SteamApi> RateLimitedClient<A> {
    pub fn new(api: A, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self {
            api,
            limiter,
            policy,
            stats: ClientStats::default(),
        }
    }

    pub fn from_config(api: A, config: &ClientConfig) -> Self {
        Self::new(
            api,
            RateLimiter::new(config.request_delay(), config.simultaneous_requests),
            RetryPolicy::from_config(config),
        )
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `op` under the limiter, retrying per the policy.
    async fn call_with_retry<T, F, Fut>(
        &self,
        what: &str,
        steam_id: SteamId,
        op: F,
    ) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut network_attempts = 0u32;
        let mut rate_limit_attempts = 0u32;

        loop {
            let result = {
                let _permit = self.limiter.acquire().await;
                self.stats.requests.fetch_add(1, Ordering::Relaxed);
                op().await
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let wait = match err {
                ApiError::NetworkFailure if network_attempts < self.policy.max_network_retries => {
                    let wait = backoff(self.policy.network_backoff, network_attempts);
                    network_attempts += 1;
                    debug!(
                        "{what} for {steam_id}: network failure, retry {network_attempts}/{} in {wait:?}",
                        self.policy.max_network_retries
                    );
                    wait
                }
                ApiError::RateLimited
                    if rate_limit_attempts < self.policy.max_rate_limit_retries =>
                {
                    self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                    let wait = backoff(self.policy.rate_limit_cooldown, rate_limit_attempts);
                    rate_limit_attempts += 1;
                    warn!(
                        target: FAILURES,
                        "{what} for {steam_id}: rate limited by Steam, cooling down for {wait:?} \
                         (retry {rate_limit_attempts}/{})",
                        self.policy.max_rate_limit_retries
                    );
                    wait
                }
                ApiError::NotFound | ApiError::Unauthorized => return Err(err),
                _ => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: FAILURES,
                        "{what} for {steam_id}: giving up after retries ({err})"
                    );
                    return Err(err);
                }
            };

            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Fetch the friend list of `steam_id`.
    pub async fn fetch_friends(&self, steam_id: SteamId) -> FetchResult {
        let result = self
            .call_with_retry("friend list", steam_id, || self.api.get_friend_list(steam_id))
            .await;

        match result {
            Ok(FriendsResponse::Friends(friends)) => FetchResult::Friends(friends),
            Ok(FriendsResponse::Private) => FetchResult::Empty,
            Err(ApiError::NotFound | ApiError::Unauthorized) => FetchResult::Empty,
            Err(err) => FetchResult::Failed(err),
        }
    }

    /// Badge ids on `steam_id`'s profile. Private profiles yield none.
    pub async fn fetch_badges(&self, steam_id: SteamId) -> Result<Vec<u32>, ApiError> {
        match self
            .call_with_retry("badges", steam_id, || self.api.get_badges(steam_id))
            .await
        {
            Err(ApiError::NotFound | ApiError::Unauthorized) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Profile summaries for `steam_ids`, in batches the API accepts.
    ///
    /// A failed batch is logged and skipped; its accounts stay unnamed.
    pub async fn fetch_profiles(&self, steam_ids: &[SteamId]) -> Vec<SteamProfile> {
        let mut profiles = Vec::with_capacity(steam_ids.len());
        for chunk in steam_ids.chunks(PLAYER_SUMMARIES_BATCH) {
            let Some(first) = chunk.first().copied() else {
                continue;
            };
            match self
                .call_with_retry("player summaries", first, || {
                    self.api.get_player_summaries(chunk)
                })
                .await
            {
                Ok(batch) => profiles.extend(batch),
                Err(err) => warn!(
                    target: FAILURES,
                    "could not resolve {} profile(s) starting at {first}: {err}",
                    chunk.len()
                ),
            }
        }
        profiles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::memory::MemorySteam;
    use pretty_assertions::assert_eq;

    fn client(api: MemorySteam, policy: RetryPolicy) -> RateLimitedClient<MemorySteam> {
        RateLimitedClient::new(api, RateLimiter::new(Duration::ZERO, 1), policy)
    }

    #[tokio::test]
    async fn successful_fetch_returns_friends() {
        let api = MemorySteam::new().with_friends(1, &[2, 3]);
        let client = client(api, RetryPolicy::immediate(0, 0));
        assert_eq!(
            client.fetch_friends(SteamId(1)).await,
            FetchResult::Friends(vec![SteamId(2), SteamId(3)])
        );
        assert_eq!(client.stats().requests, 1);
    }

    #[tokio::test]
    async fn network_failures_are_retried_within_bound() {
        let api = MemorySteam::new()
            .with_friends(1, &[])
            .with_failures(1, &[ApiError::NetworkFailure, ApiError::NetworkFailure]);
        let client = client(api, RetryPolicy::immediate(2, 0));
        assert_eq!(client.fetch_friends(SteamId(1)).await, FetchResult::Friends(vec![]));
        assert_eq!(client.api().friend_calls(SteamId(1)), 3);
        assert_eq!(client.stats().retries, 2);
    }

    #[tokio::test]
    async fn network_failures_past_bound_fail() {
        let api = MemorySteam::new().with_friends(1, &[2]).with_failures(
            1,
            &[ApiError::NetworkFailure, ApiError::NetworkFailure, ApiError::NetworkFailure],
        );
        let client = client(api, RetryPolicy::immediate(2, 0));
        assert_eq!(
            client.fetch_friends(SteamId(1)).await,
            FetchResult::Failed(ApiError::NetworkFailure)
        );
        assert_eq!(client.stats().failures, 1);
    }

    #[tokio::test]
    async fn rate_limited_calls_back_off_and_retry() {
        let api = MemorySteam::new()
            .with_friends(1, &[5])
            .with_failures(1, &[ApiError::RateLimited]);
        let client = client(api, RetryPolicy::immediate(0, 1));
        assert_eq!(client.fetch_friends(SteamId(1)).await, FetchResult::Friends(vec![SteamId(5)]));
        assert_eq!(client.stats().rate_limited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_cooldown_doubles() {
        let api = MemorySteam::new()
            .with_friends(1, &[])
            .with_failures(1, &[ApiError::RateLimited, ApiError::RateLimited]);
        let policy = RetryPolicy {
            max_network_retries: 0,
            network_backoff: Duration::ZERO,
            max_rate_limit_retries: 2,
            rate_limit_cooldown: Duration::from_secs(10),
        };
        let client = client(api, policy);
        let start = tokio::time::Instant::now();
        client.fetch_friends(SteamId(1)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn private_and_missing_profiles_are_empty_not_errors() {
        let api = MemorySteam::new()
            .with_private(1)
            .with_failures(2, &[ApiError::NotFound])
            .with_failures(3, &[ApiError::Unauthorized]);
        let client = client(api, RetryPolicy::immediate(3, 3));
        for id in [1, 2, 3] {
            assert_eq!(client.fetch_friends(SteamId(id)).await, FetchResult::Empty);
        }
        // NotFound/Unauthorized are never retried.
        assert_eq!(client.api().friend_calls(SteamId(2)), 1);
        assert_eq!(client.stats().failures, 0);
    }

    #[tokio::test]
    async fn profiles_are_fetched_in_batches() {
        let ids: Vec<SteamId> = (1..=250).map(SteamId).collect();
        let api = MemorySteam::new().with_named_profiles(&ids);
        let client = client(api, RetryPolicy::immediate(0, 0));
        let profiles = client.fetch_profiles(&ids).await;
        assert_eq!(profiles.len(), 250);
        assert_eq!(client.api().summary_batches(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn unauthorized_badges_mean_no_badges() {
        let api = MemorySteam::new().with_badge_failures(4, &[ApiError::Unauthorized]);
        let client = client(api, RetryPolicy::immediate(0, 0));
        assert_eq!(client.fetch_badges(SteamId(4)).await, Ok(vec![]));
    }
}
