//! Offline cache schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the cache schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Plate records, one row per (collection, plate)
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            plate TEXT NOT NULL,
            household TEXT NOT NULL,
            note TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (collection, plate)
        );

        -- Precomputed keyword set for fuzzy lookup
        CREATE TABLE IF NOT EXISTS record_keywords (
            collection TEXT NOT NULL,
            plate TEXT NOT NULL,
            keyword TEXT NOT NULL,
            PRIMARY KEY (collection, plate, keyword),
            FOREIGN KEY (collection, plate) REFERENCES records(collection, plate) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_record_keywords_lookup
            ON record_keywords(collection, keyword);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated cache schema to v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Collections with a usable offline copy
        CREATE TABLE IF NOT EXISTS collections (
            collection TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            synced_at TEXT NOT NULL
        );

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::debug!("migrated cache schema to v2");
    Ok(())
}
