use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;

/// Version of the on-disk layout written by this build.
pub const FORMAT_VERSION: u32 = 1;

pub const META_FORMAT_VERSION: &str = "format_version";
pub const META_VECTOR_CLOCK: &str = "vector_clock";

/// Connection settings. DELETE journalling keeps the catalog a single file
/// between transactions, so it can be copied around by file-sync tools.
pub fn configure(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = DELETE;
        PRAGMA synchronous = FULL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    configure(conn)?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// True when the file carries the `meta` table every catalog has.
pub fn is_catalog(conn: &Connection) -> Result<bool, StorageError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY,
    entry_id BLOB NOT NULL UNIQUE CHECK (length(entry_id) = 16),
    image_key TEXT NOT NULL,
    field TEXT NOT NULL,
    hlc BLOB NOT NULL CHECK (length(hlc) = 12),
    writer_id BLOB NOT NULL CHECK (length(writer_id) = 32),
    body BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_image ON entries (image_key, field);
CREATE INDEX IF NOT EXISTS idx_entries_writer ON entries (writer_id, hlc);

CREATE TABLE IF NOT EXISTS writers (
    writer_id BLOB PRIMARY KEY CHECK (length(writer_id) = 32),
    display_name TEXT,
    first_seen_hlc BLOB NOT NULL CHECK (length(first_seen_hlc) = 12)
);

CREATE TABLE IF NOT EXISTS classifications (
    content_hash BLOB PRIMARY KEY CHECK (length(content_hash) = 32),
    suggestions BLOB NOT NULL,
    classifier TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
";
