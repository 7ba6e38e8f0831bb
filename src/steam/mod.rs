//! The Steam Web API seam.
//!
//! [`SteamApi`] is the narrow interface the rest of the crate needs from
//! Steam. [`SteamWebApi`] talks to the real service; tests substitute an
//! in-memory graph.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::types::{SteamId, SteamProfile};

pub use http::SteamWebApi;

/// Maximum ids accepted by one `GetPlayerSummaries` call.
pub const PLAYER_SUMMARIES_BATCH: usize = 100;

/// Classified failure of a single API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiError {
    NotFound,
    RateLimited,
    NetworkFailure,
    Unauthorized,
}

impl ApiError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::RateLimited => "rate limited",
            Self::NetworkFailure => "network failure",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `GetFriendList` told us about one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendsResponse {
    /// The list was readable (possibly empty).
    Friends(Vec<SteamId>),
    /// The profile exists but its friend list is hidden.
    Private,
}

/// Operations the traversal needs from Steam.
#[async_trait]
pub trait SteamApi: Send + Sync {
    /// Public friend list of `steam_id`.
    async fn get_friend_list(&self, steam_id: SteamId) -> Result<FriendsResponse, ApiError>;

    /// Badge ids displayed on `steam_id`'s profile. Private profiles yield none.
    async fn get_badges(&self, steam_id: SteamId) -> Result<Vec<u32>, ApiError>;

    /// Display summaries for up to [`PLAYER_SUMMARIES_BATCH`] accounts.
    async fn get_player_summaries(
        &self,
        steam_ids: &[SteamId],
    ) -> Result<Vec<SteamProfile>, ApiError>;
}
