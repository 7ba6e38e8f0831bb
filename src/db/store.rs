//! SQLite CRUD layer for the friend-list cache.
//!
//! Every query goes through [`Connection::prepare_cached`], so the first
//! call compiles the statement and later calls reuse it. Friend lists are
//! stored as a JSON array of decimal Steam ids, in the order the API
//! returned them.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::schema::initialize_database;
use crate::error::Result;
use crate::types::{FriendList, ProfileRecord, SteamId, SteamProfile, Visibility};

// ---------------------------------------------------------------------------
// CacheStats
// ---------------------------------------------------------------------------

/// Aggregate statistics about the cache, consumed by the `stats` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Distinct accounts whose friend list is cached.
    pub friend_lists: usize,
    /// Of those, lists stored as private/unreadable.
    pub private_lists: usize,
    /// Distinct accounts in the profiles table.
    pub profiles: usize,
    /// Profiles currently flagged as targets.
    pub known_targets: usize,
    /// Approximate on-disk size (`page_count * page_size`).
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Typed wrapper around the cache database.
pub struct CacheStore {
    pub conn: Connection,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SQL constants
// ---------------------------------------------------------------------------

const UPSERT_FRIEND_LIST_SQL: &str = "\
INSERT INTO friend_lists (steam_id, friends, visibility, fetched_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(steam_id) DO UPDATE SET
  friends = excluded.friends,
  visibility = excluded.visibility,
  fetched_at = excluded.fetched_at";

const SELECT_FRIEND_LIST_SQL: &str = "\
SELECT friends, visibility, fetched_at FROM friend_lists WHERE steam_id = ?1";

const UPSERT_PROFILE_SQL: &str = "\
INSERT INTO profiles (steam_id, name, url, fetched_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(steam_id) DO UPDATE SET
  name = excluded.name,
  url = excluded.url,
  fetched_at = excluded.fetched_at";

const UPSERT_TARGET_FLAG_SQL: &str = "\
INSERT INTO profiles (steam_id, is_target, checked_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(steam_id) DO UPDATE SET
  is_target = excluded.is_target,
  checked_at = excluded.checked_at";

const SELECT_PROFILE_SQL: &str = "\
SELECT name, url, is_target, checked_at FROM profiles WHERE steam_id = ?1";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode_friends(friends: &[SteamId]) -> Result<String> {
    Ok(serde_json::to_string(friends)?)
}

fn decode_friends(raw: &str) -> Result<Vec<SteamId>> {
    Ok(serde_json::from_str(raw)?)
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl CacheStore {
    /// Open (or create) a cache database at `db_path`.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = initialize_database(db_path)?;
        Ok(Self { conn })
    }

    /// Open the cache at `db_path` only if it already exists.
    pub fn open_existing(db_path: &Path) -> Result<Option<Self>> {
        if !db_path.is_file() {
            return Ok(None);
        }
        Self::open(&db_path.to_string_lossy()).map(Some)
    }

    /// Wrap an already-initialized connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    // -------------------------------------------------------------------
    // Friend lists
    // -------------------------------------------------------------------

    /// Cached neighbour list for `owner`, or `None` when it must be fetched.
    ///
    /// Private lists come back as `Some(vec![])`.
    pub fn get_friends(&self, owner: SteamId) -> Result<Option<Vec<SteamId>>> {
        Ok(self.get_friend_list(owner)?.map(|list| list.friends))
    }

    /// Full cached record for `owner`.
    pub fn get_friend_list(&self, owner: SteamId) -> Result<Option<FriendList>> {
        let mut stmt = self.conn.prepare_cached(SELECT_FRIEND_LIST_SQL)?;
        let row = stmt
            .query_row(params![owner.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;

        match row {
            Some((friends, visibility, fetched_at)) => Ok(Some(FriendList {
                owner,
                friends: decode_friends(&friends)?,
                visibility: Visibility::from_str_loose(&visibility),
                fetched_at: from_unix(fetched_at),
            })),
            None => Ok(None),
        }
    }

    /// Persist the complete neighbour list for `owner`.
    ///
    /// Re-storing an account replaces its previous row. The write is a
    /// single upsert, so a list is either fully stored or not at all.
    pub fn put_friends(
        &self,
        owner: SteamId,
        friends: &[SteamId],
        visibility: Visibility,
    ) -> Result<()> {
        let encoded = encode_friends(friends)?;
        let mut stmt = self.conn.prepare_cached(UPSERT_FRIEND_LIST_SQL)?;
        stmt.execute(params![
            owner.to_string(),
            encoded,
            visibility.as_str(),
            Utc::now().timestamp()
        ])?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Profiles
    // -------------------------------------------------------------------

    /// Store display metadata for an account. Leaves any target verdict intact.
    pub fn record_profile(&self, profile: &SteamProfile) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(UPSERT_PROFILE_SQL)?;
        stmt.execute(params![
            profile.steam_id.to_string(),
            profile.name,
            profile.url,
            Utc::now().timestamp()
        ])?;
        Ok(())
    }

    /// Batch variant of [`record_profile`](Self::record_profile), in one transaction.
    pub fn record_profiles(&self, profiles: &[SteamProfile]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_PROFILE_SQL)?;
            let now = Utc::now().timestamp();
            for profile in profiles {
                stmt.execute(params![
                    profile.steam_id.to_string(),
                    profile.name,
                    profile.url,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remember the target verdict for an account.
    pub fn record_target_flag(
        &self,
        steam_id: SteamId,
        is_target: bool,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(UPSERT_TARGET_FLAG_SQL)?;
        stmt.execute(params![
            steam_id.to_string(),
            is_target,
            checked_at.timestamp()
        ])?;
        Ok(())
    }

    /// Everything known about `steam_id` in the profiles table.
    pub fn get_profile(&self, steam_id: SteamId) -> Result<Option<ProfileRecord>> {
        let mut stmt = self.conn.prepare_cached(SELECT_PROFILE_SQL)?;
        let row = stmt
            .query_row(params![steam_id.to_string()], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<bool>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })
            .optional()?;

        Ok(row.map(|(name, url, is_target, checked_at)| {
            let profile = match (name, url) {
                (Some(name), Some(url)) => Some(SteamProfile {
                    steam_id,
                    name,
                    url,
                }),
                _ => None,
            };
            ProfileRecord {
                steam_id,
                profile,
                is_target,
                checked_at: checked_at.map(from_unix),
            }
        }))
    }

    // -------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------

    fn count(&self, sql: &str) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of accounts whose friend list is cached.
    pub fn get_friend_list_count(&self) -> Result<usize> {
        self.count("SELECT count(*) FROM friend_lists")
    }

    /// Number of accounts known to the profiles table.
    pub fn get_profile_count(&self) -> Result<usize> {
        self.count("SELECT count(*) FROM profiles")
    }

    /// Approximate on-disk size of the database.
    pub fn get_size_bytes(&self) -> Result<u64> {
        let page_count: i64 = self.conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = self.conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    /// Aggregate cache statistics.
    pub fn get_stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            friend_lists: self.get_friend_list_count()?,
            private_lists: self
                .count("SELECT count(*) FROM friend_lists WHERE visibility = 'private'")?,
            profiles: self.get_profile_count()?,
            known_targets: self.count("SELECT count(*) FROM profiles WHERE is_target = 1")?,
            size_bytes: self.get_size_bytes()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> CacheStore {
        CacheStore::open(":memory:").expect("in-memory store should open")
    }

    fn ids(raw: &[u64]) -> Vec<SteamId> {
        raw.iter().copied().map(SteamId).collect()
    }

    #[test]
    fn unknown_account_is_a_miss() {
        let store = setup();
        assert_eq!(store.get_friends(SteamId(1)).unwrap(), None);
    }

    #[test]
    fn put_then_get_preserves_order() {
        let store = setup();
        let friends = ids(&[30, 10, 20]);
        store
            .put_friends(SteamId(1), &friends, Visibility::Public)
            .unwrap();
        assert_eq!(store.get_friends(SteamId(1)).unwrap(), Some(friends));
    }

    #[test]
    fn put_is_idempotent_and_overwrites() {
        let store = setup();
        store
            .put_friends(SteamId(1), &ids(&[2, 3]), Visibility::Public)
            .unwrap();
        store
            .put_friends(SteamId(1), &ids(&[4]), Visibility::Public)
            .unwrap();
        assert_eq!(store.get_friends(SteamId(1)).unwrap(), Some(ids(&[4])));
        assert_eq!(store.get_friend_list_count().unwrap(), 1);
    }

    #[test]
    fn private_list_is_cached_as_empty() {
        let store = setup();
        store
            .put_friends(SteamId(9), &[], Visibility::Private)
            .unwrap();
        let list = store.get_friend_list(SteamId(9)).unwrap().unwrap();
        assert!(list.friends.is_empty());
        assert_eq!(list.visibility, Visibility::Private);
    }

    #[test]
    fn profile_and_target_flag_are_independent() {
        let store = setup();
        let now = Utc::now();
        store.record_target_flag(SteamId(5), true, now).unwrap();
        store
            .record_profile(&SteamProfile {
                steam_id: SteamId(5),
                name: "erik".into(),
                url: "https://steamcommunity.com/id/erik/".into(),
            })
            .unwrap();

        let record = store.get_profile(SteamId(5)).unwrap().unwrap();
        assert_eq!(record.is_target, Some(true));
        assert_eq!(record.profile.unwrap().name, "erik");
        assert_eq!(record.checked_at.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn target_flag_without_profile_has_no_name() {
        let store = setup();
        store
            .record_target_flag(SteamId(6), false, Utc::now())
            .unwrap();
        let record = store.get_profile(SteamId(6)).unwrap().unwrap();
        assert!(record.profile.is_none());
        assert_eq!(record.is_target, Some(false));
    }

    #[test]
    fn stats_count_lists_profiles_and_size() {
        let store = setup();
        store
            .put_friends(SteamId(1), &ids(&[2]), Visibility::Public)
            .unwrap();
        store
            .put_friends(SteamId(2), &[], Visibility::Private)
            .unwrap();
        store
            .record_profiles(&[
                SteamProfile {
                    steam_id: SteamId(1),
                    name: "a".into(),
                    url: "u1".into(),
                },
                SteamProfile {
                    steam_id: SteamId(2),
                    name: "b".into(),
                    url: "u2".into(),
                },
            ])
            .unwrap();
        store.record_target_flag(SteamId(2), true, Utc::now()).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.friend_lists, 2);
        assert_eq!(stats.private_lists, 1);
        assert_eq!(stats.profiles, 2);
        assert_eq!(stats.known_targets, 1);
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let path = path.to_str().unwrap();
        {
            let store = CacheStore::open(path).unwrap();
            store
                .put_friends(SteamId(1), &ids(&[2, 3]), Visibility::Public)
                .unwrap();
        }
        let store = CacheStore::open(path).unwrap();
        assert_eq!(store.get_friends(SteamId(1)).unwrap(), Some(ids(&[2, 3])));
    }

    #[test]
    fn open_existing_never_creates_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nested").join("cache.db");
        assert!(CacheStore::open_existing(&missing).unwrap().is_none());
        assert!(!missing.exists());
        assert!(!dir.path().join("nested").exists());

        let path = dir.path().join("cache.db");
        CacheStore::open(path.to_str().unwrap()).unwrap();
        let store = CacheStore::open_existing(&path).unwrap().unwrap();
        assert_eq!(store.get_stats().unwrap().friend_lists, 0);
    }

    #[test]
    fn writes_fail_on_read_only_connection() {
        let store = setup();
        store.conn.pragma_update(None, "query_only", true).unwrap();
        assert!(store
            .put_friends(SteamId(1), &[], Visibility::Public)
            .is_err());
    }
}
