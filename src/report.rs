//! Human-readable output: target chains with display names, and cache stats.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::client::RateLimitedClient;
use crate::db::{CacheStats, CacheStore};
use crate::observability::FAILURES;
use crate::steam::SteamApi;
use crate::traversal::{Chain, Finding};
use crate::types::{ProfileRecord, SteamId, SteamProfile};

/// Display names for `steam_ids`: cache first, then Steam when `client` is given.
///
/// Freshly fetched profiles are cached. Accounts Steam does not describe
/// (private or deleted) are simply absent from the result.
pub async fn resolve_profiles<A: SteamApi>(
    steam_ids: &[SteamId],
    store: &CacheStore,
    client: Option<&RateLimitedClient<A>>,
) -> HashMap<SteamId, SteamProfile> {
    let mut profiles = HashMap::new();
    let mut missing = Vec::new();

    for &id in steam_ids {
        match store.get_profile(id) {
            Ok(Some(ProfileRecord {
                profile: Some(profile),
                ..
            })) => {
                debug!("mapping {id} to {} (cache hit)", profile.name);
                profiles.insert(id, profile);
            }
            Ok(_) => missing.push(id),
            Err(e) => {
                warn!(target: FAILURES, "could not read cached profile for {id}: {e}");
                missing.push(id);
            }
        }
    }

    let Some(client) = client else {
        if !missing.is_empty() {
            debug!("{} profile(s) left unresolved (cached-only)", missing.len());
        }
        return profiles;
    };
    if missing.is_empty() {
        return profiles;
    }

    debug!("resolving {} profile(s) from Steam", missing.len());
    let fetched = client.fetch_profiles(&missing).await;
    if let Err(e) = store.record_profiles(&fetched) {
        warn!(target: FAILURES, "could not cache {} profile(s): {e}", fetched.len());
    }
    for profile in fetched {
        profiles.insert(profile.steam_id, profile);
    }
    profiles
}

fn display_name(id: SteamId, profiles: &HashMap<SteamId, SteamProfile>) -> String {
    profiles
        .get(&id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// `root → friend → ... → target (target)`.
pub fn render_chain(chain: &Chain, profiles: &HashMap<SteamId, SteamProfile>) -> String {
    let names: Vec<String> = chain
        .path
        .iter()
        .map(|&id| display_name(id, profiles))
        .collect();
    format!("{} (target)", names.join(" → "))
}

/// Multi-line summary of a successful search.
pub fn render_finding(finding: &Finding, profiles: &HashMap<SteamId, SteamProfile>) -> String {
    let mut out = format!(
        "Found {} target(s) at {} degree(s) of separation.",
        finding.chains().count(),
        finding.degree
    );
    for chain in finding.chains() {
        let who = match profiles.get(&chain.target) {
            Some(p) => format!("{} <{}>", p.name, p.url),
            None => format!("{} (private profile)", chain.target),
        };
        out.push_str(&format!("\n  {who}\n    chain: {}", render_chain(chain, profiles)));
    }
    out
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Summary printed by the `stats` command.
pub fn render_stats(stats: &CacheStats) -> String {
    format!(
        "friend lists cached: {} ({} private)\nprofiles known:      {} ({} targets)\ndatabase size:       {}",
        stats.friend_lists,
        stats.private_lists,
        stats.profiles,
        stats.known_targets,
        human_bytes(stats.size_bytes)
    )
}
