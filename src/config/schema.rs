//! Configuration data structures.
//!
//! Loaded from an optional YAML file and then overridden by CLI flags.
//! Every field has a default so an empty (or absent) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DegreesError, Result};
use crate::observability::Verbosity;
use crate::types::{SteamId, GABE_NEWELL};

/// Seconds between requests: Steam allows 200 requests per 5 minutes.
pub const DEFAULT_REQUEST_DELAY_SECS: f64 = 1.5;

/// Upper bound for any configured duration (one year).
pub const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub verbosity: Verbosity,

    #[serde(default)]
    pub traversal: TraversalConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub targets: TargetConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl RunConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
            .map_err(|e| DegreesError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from a YAML file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DegreesError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    /// Reject values that would make the run meaningless or abusive.
    pub fn validate(&self) -> Result<()> {
        if self.traversal.max_depth == 0 {
            return Err(DegreesError::Config("max_depth must be at least 1".into()));
        }
        if self.client.simultaneous_requests == 0 {
            return Err(DegreesError::Config(
                "simultaneous_requests must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("request_delay", self.client.request_delay_secs),
            ("rate_limit_cooldown", self.client.rate_limit_cooldown_secs),
            ("timeout", self.client.timeout_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(DegreesError::Config(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
            if value > MAX_DURATION_SECS || Duration::try_from_secs_f64(value).is_err() {
                return Err(DegreesError::Config(format!(
                    "{name} of {value} seconds is too large (at most {MAX_DURATION_SECS})"
                )));
            }
        }
        if self.client.timeout_secs == 0.0 {
            return Err(DegreesError::Config("timeout must be positive".into()));
        }
        self.targets.resolve()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TraversalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Deepest level whose accounts may still be detected (but not expanded).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Rate limiting and retry knobs. Under-throttling gets API keys suspended,
/// so these are deliberately conservative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Minimum gap between the end of one request and the start of the next.
    #[serde(default = "default_request_delay")]
    pub request_delay_secs: f64,

    #[serde(default = "default_simultaneous_requests")]
    pub simultaneous_requests: usize,

    /// Extra attempts after a network failure.
    #[serde(default = "default_network_retries")]
    pub max_network_retries: u32,

    /// Extra attempts after HTTP 429.
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// First cooldown after HTTP 429; doubles on each further 429.
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: f64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_delay_secs: default_request_delay(),
            simultaneous_requests: default_simultaneous_requests(),
            max_network_retries: default_network_retries(),
            max_rate_limit_retries: default_rate_limit_retries(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn request_delay(&self) -> Duration {
        seconds(self.request_delay_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        seconds(self.rate_limit_cooldown_secs)
    }

    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_secs)
    }
}

/// Clamped into `0..=MAX_DURATION_SECS`; NaN becomes zero. `validate`
/// rejects anything this would have to clamp.
fn seconds(value: f64) -> Duration {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, MAX_DURATION_SECS) };
    Duration::try_from_secs_f64(clamped).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// TargetConfig
// ---------------------------------------------------------------------------

/// Who counts as a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Steam ids or aliases; entries may be comma separated.
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,

    /// Profile badge that marks a target. `None` disables badge lookups.
    #[serde(default)]
    pub badge_id: Option<u32>,

    /// How long a cached badge verdict is trusted.
    #[serde(default = "default_badge_ttl_hours")]
    pub badge_ttl_hours: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            badge_id: None,
            badge_ttl_hours: default_badge_ttl_hours(),
        }
    }
}

impl TargetConfig {
    /// Expand aliases and split comma lists into concrete ids.
    pub fn resolve(&self) -> Result<Vec<SteamId>> {
        parse_targets(&self.targets)
    }

    pub fn badge_ttl(&self) -> chrono::Duration {
        // Capped at a century; chrono panics on overflow.
        chrono::Duration::hours(self.badge_ttl_hours.min(24 * 365 * 100) as i64)
    }
}

/// Expand target tokens. `GabeNewell` is an alias for the hardcoded target.
pub fn parse_targets(tokens: &[String]) -> Result<Vec<SteamId>> {
    let mut ids = Vec::new();
    for token in tokens.iter().flat_map(|t| t.split(',')) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let id = match token {
            "GabeNewell" => GABE_NEWELL,
            other => other.parse()?,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Which caches may be used without touching the network.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CachedOnly {
    #[default]
    None,
    All,
    FriendsOnly,
    ProfilesOnly,
}

impl CachedOnly {
    /// Friend lists must come from the cache.
    pub fn friends(&self) -> bool {
        matches!(self, Self::All | Self::FriendsOnly)
    }

    /// Profiles (names and badge verdicts) must come from the cache.
    pub fn profiles(&self) -> bool {
        matches!(self, Self::All | Self::ProfilesOnly)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub db_file: Option<PathBuf>,

    #[serde(default)]
    pub cached_only: CachedOnly,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_max_depth() -> u32 {
    6
}

fn default_request_delay() -> f64 {
    DEFAULT_REQUEST_DELAY_SECS
}

fn default_simultaneous_requests() -> usize {
    1
}

fn default_network_retries() -> u32 {
    3
}

fn default_rate_limit_retries() -> u32 {
    5
}

fn default_rate_limit_cooldown() -> f64 {
    60.0
}

fn default_timeout() -> f64 {
    30.0
}

fn default_targets() -> Vec<String> {
    vec!["GabeNewell".to_string()]
}

fn default_badge_ttl_hours() -> u64 {
    24 * 7
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
