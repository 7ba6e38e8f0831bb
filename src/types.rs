//! Core domain types.
//!
//! Steam identifies accounts by 64-bit ids that the Web API always sends
//! as decimal strings. [`SteamId`] keeps the numeric form so that ordering
//! (and therefore discovery order) is numeric and stable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DegreesError;

// ---------------------------------------------------------------------------
// SteamId
// ---------------------------------------------------------------------------

/// A Steam account identifier (SteamID64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SteamId(pub u64);

/// Gabe Newell's public SteamID64, the hardcoded member of the target set.
pub const GABE_NEWELL: SteamId = SteamId(76561197960287930);

impl SteamId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SteamId {
    type Err = DegreesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(SteamId)
            .map_err(|_| DegreesError::Config(format!("invalid Steam ID: {s:?}")))
    }
}

impl From<u64> for SteamId {
    fn from(value: u64) -> Self {
        SteamId(value)
    }
}

impl Serialize for SteamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SteamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Public profile summary, as returned by `GetPlayerSummaries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteamProfile {
    #[serde(rename = "steamid")]
    pub steam_id: SteamId,
    #[serde(rename = "personaname")]
    pub name: String,
    #[serde(rename = "profileurl")]
    pub url: String,
}

/// Everything the profiles table knows about one account.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    pub steam_id: SteamId,
    pub profile: Option<SteamProfile>,
    /// Cached target verdict; `None` when never checked.
    pub is_target: Option<bool>,
    pub checked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Friend lists
// ---------------------------------------------------------------------------

/// Whether a friend list was actually readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    /// Private, deleted or otherwise unreadable. Stored with no friends.
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            _ => Self::Private,
        }
    }
}

/// The cached neighbour list of one account.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendList {
    pub owner: SteamId,
    pub friends: Vec<SteamId>,
    pub visibility: Visibility,
    pub fetched_at: DateTime<Utc>,
}
