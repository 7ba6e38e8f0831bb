//! SQLite schema initialization for the friend-list cache.
//!
//! Two tables: one friend list per expanded account, and one profile row
//! per account we ever resolved a name or a target verdict for.

use rusqlite::Connection;

// ---------------------------------------------------------------------------
// DDL constants
// ---------------------------------------------------------------------------

const CREATE_FRIEND_LISTS: &str = "\
CREATE TABLE IF NOT EXISTS friend_lists (
  steam_id TEXT PRIMARY KEY,
  friends TEXT NOT NULL,
  visibility TEXT NOT NULL DEFAULT 'public',
  fetched_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
)";

const CREATE_PROFILES: &str = "\
CREATE TABLE IF NOT EXISTS profiles (
  steam_id TEXT PRIMARY KEY,
  name TEXT,
  url TEXT,
  is_target INTEGER,
  checked_at INTEGER,
  fetched_at INTEGER
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_friend_lists_visibility ON friend_lists(visibility)",
    "CREATE INDEX IF NOT EXISTS idx_profiles_target ON profiles(is_target)",
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Open (or create) the SQLite database at `db_path` and apply the schema.
///
/// The returned connection has WAL mode and synchronous NORMAL configured,
/// and a busy timeout so that a second process holding the lock is waited
/// on briefly instead of failing the first write.
///
/// # Errors
///
/// Returns a `rusqlite::Error` if the database cannot be opened or any DDL
/// statement fails.
pub fn initialize_database(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;

    // In-memory databases report "memory" for journal_mode; that's fine.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute_batch(CREATE_FRIEND_LISTS)?;
    conn.execute_batch(CREATE_PROFILES)?;
    for ddl in CREATE_INDEXES {
        conn.execute_batch(ddl)?;
    }

    Ok(conn)
}
