//! In-memory [`SteamApi`] for tests and offline experiments.
//!
//! Accounts without a configured friend list answer `NotFound`. Failures
//! queued with `with_failures` are returned, in order, before the
//! configured answer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ApiError, FriendsResponse, SteamApi};
use crate::types::{SteamId, SteamProfile};

#[derive(Debug, Default)]
struct State {
    friends: HashMap<SteamId, FriendsResponse>,
    friend_failures: HashMap<SteamId, VecDeque<ApiError>>,
    badges: HashMap<SteamId, Vec<u32>>,
    badge_failures: HashMap<SteamId, VecDeque<ApiError>>,
    profiles: HashMap<SteamId, SteamProfile>,
    friend_calls: HashMap<SteamId, usize>,
    friend_latency: Duration,
    friend_starts: Vec<Instant>,
    friends_in_flight: usize,
    max_friends_in_flight: usize,
    badge_calls: HashMap<SteamId, usize>,
    summary_batches: Vec<usize>,
}

/// A scripted social graph.
#[derive(Debug, Default)]
pub struct MemorySteam {
    state: Mutex<State>,
}

fn ids(raw: &[u64]) -> Vec<SteamId> {
    raw.iter().copied().map(SteamId).collect()
}

impl MemorySteam {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()));
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `owner`'s public friend list.
    pub fn with_friends(self, owner: u64, friends: &[u64]) -> Self {
        self.with_state(|s| {
            s.friends
                .insert(SteamId(owner), FriendsResponse::Friends(ids(friends)));
        })
    }

    /// `owner` hides its friend list.
    pub fn with_private(self, owner: u64) -> Self {
        self.with_state(|s| {
            s.friends.insert(SteamId(owner), FriendsResponse::Private);
        })
    }

    /// Failures returned by `get_friend_list(owner)` before its real answer.
    pub fn with_failures(self, owner: u64, failures: &[ApiError]) -> Self {
        self.with_state(|s| {
            s.friend_failures
                .entry(SteamId(owner))
                .or_default()
                .extend(failures.iter().copied());
        })
    }

    /// Every `get_friend_list` call takes `latency` to answer.
    pub fn with_friend_latency(self, latency: Duration) -> Self {
        self.with_state(|s| s.friend_latency = latency)
    }

    pub fn with_badges(self, owner: u64, badges: &[u32]) -> Self {
        self.with_state(|s| {
            s.badges.insert(SteamId(owner), badges.to_vec());
        })
    }

    /// Failures returned by `get_badges(owner)` before its real answer.
    pub fn with_badge_failures(self, owner: u64, failures: &[ApiError]) -> Self {
        self.with_state(|s| {
            s.badge_failures
                .entry(SteamId(owner))
                .or_default()
                .extend(failures.iter().copied());
        })
    }

    /// Give every id a profile named `user-<id>`.
    pub fn with_named_profiles(self, steam_ids: &[SteamId]) -> Self {
        self.with_state(|s| {
            for &id in steam_ids {
                s.profiles.insert(
                    id,
                    SteamProfile {
                        steam_id: id,
                        name: format!("user-{id}"),
                        url: format!("https://steamcommunity.com/profiles/{id}/"),
                    },
                );
            }
        })
    }

    pub fn friend_calls(&self, steam_id: SteamId) -> usize {
        self.state().friend_calls.get(&steam_id).copied().unwrap_or(0)
    }

    pub fn total_friend_calls(&self) -> usize {
        self.state().friend_calls.values().sum()
    }

    /// When each `get_friend_list` call started, in call order.
    pub fn friend_call_starts(&self) -> Vec<Instant> {
        self.state().friend_starts.clone()
    }

    /// Most `get_friend_list` calls ever running at the same moment.
    pub fn max_friends_in_flight(&self) -> usize {
        self.state().max_friends_in_flight
    }

    pub fn badge_calls(&self, steam_id: SteamId) -> usize {
        self.state().badge_calls.get(&steam_id).copied().unwrap_or(0)
    }

    pub fn total_badge_calls(&self) -> usize {
        self.state().badge_calls.values().sum()
    }

    /// Size of every `get_player_summaries` request, in call order.
    pub fn summary_batches(&self) -> Vec<usize> {
        self.state().summary_batches.clone()
    }
}

#[async_trait]
impl SteamApi for MemorySteam {
    async fn get_friend_list(&self, steam_id: SteamId) -> Result<FriendsResponse, ApiError> {
        let latency = {
            let mut state = self.state();
            *state.friend_calls.entry(steam_id).or_default() += 1;
            state.friend_starts.push(Instant::now());
            state.friends_in_flight += 1;
            state.max_friends_in_flight = state.max_friends_in_flight.max(state.friends_in_flight);
            state.friend_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.friends_in_flight -= 1;
        if let Some(err) = state
            .friend_failures
            .get_mut(&steam_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        state
            .friends
            .get(&steam_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn get_badges(&self, steam_id: SteamId) -> Result<Vec<u32>, ApiError> {
        let mut state = self.state();
        *state.badge_calls.entry(steam_id).or_default() += 1;
        if let Some(err) = state
            .badge_failures
            .get_mut(&steam_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(state.badges.get(&steam_id).cloned().unwrap_or_default())
    }

    async fn get_player_summaries(
        &self,
        steam_ids: &[SteamId],
    ) -> Result<Vec<SteamProfile>, ApiError> {
        let mut state = self.state();
        state.summary_batches.push(steam_ids.len());
        Ok(steam_ids
            .iter()
            .filter_map(|id| state.profiles.get(id).cloned())
            .collect())
    }
}
