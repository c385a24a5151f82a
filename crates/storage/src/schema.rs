use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS resources (
    resource_id BLOB PRIMARY KEY CHECK (length(resource_id) = 16),
    kind TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    fields BLOB NOT NULL,
    sensitive INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_resources_kind ON resources(kind);

CREATE TABLE IF NOT EXISTS revisions (
    resource_id BLOB NOT NULL REFERENCES resources(resource_id) ON DELETE CASCADE,
    version INTEGER NOT NULL,
    fields BLOB NOT NULL,
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (resource_id, version)
) WITHOUT ROWID;
";
