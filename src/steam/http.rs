//! `reqwest`-backed implementation of [`SteamApi`].
//!
//! Response bodies are parsed by free functions so the classification
//! rules can be tested without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ApiError, FriendsResponse, SteamApi, PLAYER_SUMMARIES_BATCH};
use crate::error::{DegreesError, Result};
use crate::observability::{redact_secrets, FAILURES};
use crate::types::{SteamId, SteamProfile};

pub const DEFAULT_BASE_URL: &str = "https://api.steampowered.com";

const USER_AGENT: &str =
    "steam-degrees (degrees of separation from Valve employees; low request rate)";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FriendListEnvelope {
    friendslist: Option<FriendListBody>,
}

#[derive(Debug, Deserialize)]
struct FriendListBody {
    #[serde(default)]
    friends: Vec<RawFriend>,
}

#[derive(Debug, Deserialize)]
struct RawFriend {
    steamid: SteamId,
    #[serde(default)]
    relationship: String,
}

#[derive(Debug, Deserialize)]
struct BadgesEnvelope {
    #[serde(default)]
    response: Option<BadgesBody>,
}

#[derive(Debug, Deserialize)]
struct BadgesBody {
    #[serde(default)]
    badges: Vec<RawBadge>,
}

#[derive(Debug, Deserialize)]
struct RawBadge {
    badgeid: u32,
}

#[derive(Debug, Deserialize)]
struct SummariesEnvelope {
    response: SummariesBody,
}

#[derive(Debug, Deserialize)]
struct SummariesBody {
    #[serde(default)]
    players: Vec<SteamProfile>,
}

// ---------------------------------------------------------------------------
// Classification & parsing
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status onto an [`ApiError`]. `None` means success.
pub fn classify_status(status: u16) -> Option<ApiError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(ApiError::Unauthorized),
        404 => Some(ApiError::NotFound),
        429 => Some(ApiError::RateLimited),
        _ => Some(ApiError::NetworkFailure),
    }
}

/// Parse a `GetFriendList` body.
///
/// A body without `friendslist` is a private profile. Only real friendships
/// are kept, and an account listing itself is dropped.
pub fn parse_friend_list(
    owner: SteamId,
    body: &str,
) -> std::result::Result<FriendsResponse, ApiError> {
    let envelope: FriendListEnvelope =
        serde_json::from_str(body).map_err(|_| ApiError::NetworkFailure)?;
    let Some(list) = envelope.friendslist else {
        return Ok(FriendsResponse::Private);
    };

    let friends = list
        .friends
        .into_iter()
        .filter(|f| f.relationship == "friend" && f.steamid != owner)
        .map(|f| f.steamid)
        .collect();
    Ok(FriendsResponse::Friends(friends))
}

/// Parse a `GetBadges` body into badge ids.
pub fn parse_badges(body: &str) -> std::result::Result<Vec<u32>, ApiError> {
    let envelope: BadgesEnvelope =
        serde_json::from_str(body).map_err(|_| ApiError::NetworkFailure)?;
    Ok(envelope
        .response
        .map(|r| r.badges.into_iter().map(|b| b.badgeid).collect())
        .unwrap_or_default())
}

/// Parse a `GetPlayerSummaries` body.
pub fn parse_player_summaries(body: &str) -> std::result::Result<Vec<SteamProfile>, ApiError> {
    let envelope: SummariesEnvelope =
        serde_json::from_str(body).map_err(|_| ApiError::NetworkFailure)?;
    Ok(envelope.response.players)
}

// ---------------------------------------------------------------------------
// SteamWebApi
// ---------------------------------------------------------------------------

/// Steam Web API client. The API key is attached to every request.
#[derive(Clone)]
pub struct SteamWebApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for SteamWebApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteamWebApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SteamWebApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(DegreesError::Config(
                "Steam API key is required. Set STEAM_API_KEY environment variable.".into(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DegreesError::Http(redact_secrets(&e.to_string())))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        })
    }

    /// Point the client at a different host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<String, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    target: FAILURES,
                    "request to {path} failed: {}",
                    redact_secrets(&e.to_string())
                );
                ApiError::NetworkFailure
            })?;

        let status = response.status();
        if let Some(err) = classify_status(status.as_u16()) {
            if status != StatusCode::NOT_FOUND {
                debug!("{path} returned HTTP {status}");
            }
            return Err(err);
        }

        response.text().await.map_err(|e| {
            warn!(
                target: FAILURES,
                "reading body from {path} failed: {}",
                redact_secrets(&e.to_string())
            );
            ApiError::NetworkFailure
        })
    }
}

#[async_trait]
impl SteamApi for SteamWebApi {
    async fn get_friend_list(&self, steam_id: SteamId) -> std::result::Result<FriendsResponse, ApiError> {
        let body = self
            .get(
                "ISteamUser/GetFriendList/v1",
                &[
                    ("steamid", steam_id.to_string()),
                    ("relationship", "friend".to_string()),
                ],
            )
            .await?;
        parse_friend_list(steam_id, &body)
    }

    async fn get_badges(&self, steam_id: SteamId) -> std::result::Result<Vec<u32>, ApiError> {
        let body = self
            .get(
                "IPlayerService/GetBadges/v1",
                &[("steamid", steam_id.to_string())],
            )
            .await?;
        parse_badges(&body)
    }

    async fn get_player_summaries(
        &self,
        steam_ids: &[SteamId],
    ) -> std::result::Result<Vec<SteamProfile>, ApiError> {
        let joined = steam_ids
            .iter()
            .take(PLAYER_SUMMARIES_BATCH)
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let body = self
            .get("ISteamUser/GetPlayerSummaries/v2", &[("steamids", joined)])
            .await?;
        parse_player_summaries(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
