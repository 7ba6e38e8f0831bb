//! Level-by-level breadth-first search for the nearest target.
//!
//! [`FrontierEngine`] owns the per-run state (visited set, frontier, first
//! parents) and borrows the long-lived collaborators: the cache store, the
//! rate-limited client and the target detector.

pub mod engine;

pub use engine::{FrontierEngine, TraversalOptions, MAX_CONSECUTIVE_STORAGE_FAILURES};

use crate::types::SteamId;

/// One root-to-target chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub target: SteamId,
    /// Root first, target last. `path.len() == degree + 1`.
    pub path: Vec<SteamId>,
}

/// Targets found at the first level that contained any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Degrees of separation (0 when the root itself is a target).
    pub degree: u32,
    /// The lowest-id target at that level.
    pub nearest: Chain,
    /// Every other target at the same level, ascending by id.
    pub others: Vec<Chain>,
}

impl Finding {
    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        std::iter::once(&self.nearest).chain(self.others.iter())
    }

    /// Every account that appears on any chain, deduplicated, in chain order.
    pub fn related_accounts(&self) -> Vec<SteamId> {
        let mut seen = std::collections::HashSet::new();
        self.chains()
            .flat_map(|c| c.path.iter().copied())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// How a traversal ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalOutcome {
    Found(Finding),
    /// Level `depth` turned out empty: the reachable component holds no target.
    Exhausted { depth: u32 },
    /// Accounts at `max_depth` were discovered but not expanded.
    DepthLimitReached { max_depth: u32 },
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub levels: u32,
    pub discovered: usize,
    pub expanded: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub private_profiles: usize,
    pub fetch_failures: usize,
    pub skipped_uncached: usize,
    pub storage_failures: usize,
}
