//! Command-line surface.
//!
//! Flags override the YAML config file, which overrides built-in defaults.
//! The historical underscore spellings (`--max_depth`, ...) are accepted as
//! aliases.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{CachedOnly, RunConfig};
use crate::error::Result;
use crate::observability::Verbosity;
use crate::types::SteamId;

const DB_FILE_NAME: &str = "steam-degrees.db";

#[derive(Debug, Parser)]
#[command(
    name = "steam-degrees",
    version,
    about = "How many Steam friendships separate you from a Valve employee?",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub search: SearchArgs,
}

impl Cli {
    /// The subcommand to run; a bare invocation is a search.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Search(self.search))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search for the nearest target from an account (default).
    Search(SearchArgs),
    /// Print aggregate counts from the cache database.
    Stats(StatsArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct SearchArgs {
    /// Account to start from.
    #[arg(long, alias = "initial_steam_id", env = "DEFAULT_INITIAL_STEAM_ID")]
    pub initial_steam_id: Option<SteamId>,

    /// Steam Web API key.
    #[arg(long, env = "STEAM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Cache database path.
    #[arg(long, alias = "db_file")]
    pub db_file: Option<PathBuf>,

    /// YAML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Maximum number of hops to search. Default: 6
    #[arg(long, alias = "max_depth")]
    pub max_depth: Option<u32>,

    /// Seconds between requests. Default: 1.5 (200 requests / 5 minutes)
    #[arg(long, alias = "request_delay")]
    pub request_delay: Option<f64>,

    /// Requests allowed in flight at once. Default: 1
    #[arg(long, alias = "simultaneous_requests")]
    pub simultaneous_requests: Option<usize>,

    /// Who to look for: Steam ids or `GabeNewell`, comma separated.
    #[arg(long, num_args = 1..)]
    pub targets: Option<Vec<String>>,

    /// Profile badge id that marks a target.
    #[arg(long, alias = "badge_id")]
    pub badge_id: Option<u32>,

    /// Only use cached data (useful while rate limited).
    #[arg(long, alias = "cached_only", value_enum)]
    pub cached_only: Option<CachedOnly>,

    #[arg(long, value_enum)]
    pub verbosity: Option<Verbosity>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StatsArgs {
    /// Cache database path.
    #[arg(long, alias = "db_file")]
    pub db_file: Option<PathBuf>,
}

impl SearchArgs {
    /// Load the config file (if any) and layer these flags on top.
    pub fn to_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(v) = self.verbosity {
            config.verbosity = v;
        }
        if let Some(v) = self.max_depth {
            config.traversal.max_depth = v;
        }
        if let Some(v) = self.request_delay {
            config.client.request_delay_secs = v;
        }
        if let Some(v) = self.simultaneous_requests {
            config.client.simultaneous_requests = v;
        }
        if let Some(v) = &self.targets {
            config.targets.targets = v.clone();
        }
        if let Some(v) = self.badge_id {
            config.targets.badge_id = Some(v);
        }
        if let Some(v) = self.cached_only {
            config.cache.cached_only = v;
        }
        if let Some(v) = &self.db_file {
            config.cache.db_file = Some(v.clone());
        }
    }
}

/// Explicit path, else the per-user data directory, else the working directory.
pub fn resolve_db_path(explicit: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    match directories::ProjectDirs::from("", "", "steam-degrees") {
        Some(dirs) => dirs.data_dir().join(DB_FILE_NAME),
        None => PathBuf::from(DB_FILE_NAME),
    }
}
