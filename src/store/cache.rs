//! `SQLite` offline cache for plate records

use std::path::Path;

use chrono::Utc;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use super::{PlateRecord, schema};
use crate::{Error, Result};

type CachePool = Pool<SqliteConnectionManager>;

/// Offline copy of the plate collections
#[derive(Clone)]
pub struct LocalCache {
    pool: CachePool,
}

impl LocalCache {
    /// Open (or create) the cache database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let cache = Self { pool };
        let conn = cache.conn()?;
        schema::init(&conn)?;

        tracing::info!(
            path = %path.as_ref().display(),
            version = schema::SCHEMA_VERSION,
            "offline cache opened"
        );
        Ok(cache)
    }

    /// Create an in-memory cache (for testing and console demos)
    ///
    /// # Errors
    ///
    /// Returns error if the schema cannot be created
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let cache = Self { pool };
        let conn = cache.conn()?;
        schema::init(&conn)?;
        Ok(cache)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Whether `collection` has ever been cached
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn has_collection(&self, collection: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT collection FROM collections WHERE collection = ?1",
                [collection],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Look up one record by plate
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn get(&self, collection: &str, plate: &str) -> Result<Option<PlateRecord>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT plate, household, note FROM records WHERE collection = ?1 AND plate = ?2",
                [collection, plate],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(plate, household, note)| hydrate(&conn, collection, plate, household, note))
            .transpose()
    }

    /// Records whose keyword set contains `keyword`
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn find_by_keyword(&self, collection: &str, keyword: &str) -> Result<Vec<PlateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.plate, r.household, r.note
             FROM record_keywords k
             JOIN records r ON r.collection = k.collection AND r.plate = k.plate
             WHERE k.collection = ?1 AND k.keyword = ?2
             ORDER BY r.plate",
        )?;

        let rows = stmt
            .query_map([collection, keyword], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<(String, String, String)>, _>>()?;

        rows.into_iter()
            .map(|(plate, household, note)| hydrate(&conn, collection, plate, household, note))
            .collect()
    }

    /// Insert or replace one record
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn upsert(&self, collection: &str, record: &PlateRecord) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_record(&tx, collection, record)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace a collection's records in bulk and mark it as cached
    ///
    /// # Errors
    ///
    /// Returns error if the write fails; nothing is written in that case
    pub fn store_collection(
        &self,
        collection: &str,
        records: &[PlateRecord],
        source: &str,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for record in records {
            write_record(&tx, collection, record)?;
        }
        tx.execute(
            "INSERT INTO collections (collection, source, synced_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection) DO UPDATE SET source = excluded.source, synced_at = excluded.synced_at",
            params![collection, source, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::info!(collection, source, records = records.len(), "collection cached");
        Ok(records.len())
    }

    /// Number of cached records in a collection
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn write_record(conn: &Connection, collection: &str, record: &PlateRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO records (collection, plate, household, note, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(collection, plate) DO UPDATE SET
            household = excluded.household,
            note = excluded.note,
            updated_at = excluded.updated_at",
        params![
            collection,
            record.plate,
            record.household,
            record.note,
            Utc::now().to_rfc3339()
        ],
    )?;

    conn.execute(
        "DELETE FROM record_keywords WHERE collection = ?1 AND plate = ?2",
        [collection, record.plate.as_str()],
    )?;
    for keyword in &record.keywords {
        conn.execute(
            "INSERT OR IGNORE INTO record_keywords (collection, plate, keyword) VALUES (?1, ?2, ?3)",
            [collection, record.plate.as_str(), keyword.as_str()],
        )?;
    }

    Ok(())
}

fn hydrate(
    conn: &Connection,
    collection: &str,
    plate: String,
    household: String,
    note: String,
) -> Result<PlateRecord> {
    let mut stmt = conn.prepare(
        "SELECT keyword FROM record_keywords WHERE collection = ?1 AND plate = ?2 ORDER BY keyword",
    )?;
    let keywords = stmt
        .query_map([collection, plate.as_str()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(PlateRecord {
        plate,
        household,
        note,
        keywords,
    })
}
