//! SQLite-backed cache storage.
//!
//! One row per (generation, key); writes overwrite, reads judge
//! staleness against a caller-supplied budget.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Cache storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Schema init error: {0}")]
    Schema(String),
}

/// A persisted response snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub captured_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry age relative to `now`. A capture timestamp in the future
    /// counts as age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True while the entry is within its staleness budget.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < max_age
    }
}

/// Thread-safe persistent cache store.
#[derive(Clone)]
pub struct CacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl CacheStore {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                generation   TEXT NOT NULL,
                key          TEXT NOT NULL,
                payload      BLOB NOT NULL,
                content_type TEXT NOT NULL,
                captured_at  TEXT NOT NULL,
                PRIMARY KEY (generation, key)
            );",
        )
        .map_err(|e| StoreError::Schema(format!("cache schema init failed: {}", e)))?;
        Ok(())
    }

    /// Insert or overwrite the entry for `key` within `generation`.
    pub fn put(
        &self,
        generation: &str,
        key: &str,
        payload: &[u8],
        content_type: &str,
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cache_entries (generation, key, payload, content_type, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(generation, key) DO UPDATE SET
             payload=excluded.payload, content_type=excluded.content_type,
             captured_at=excluded.captured_at",
            params![
                generation,
                key,
                payload,
                content_type,
                captured_at.format("%Y-%m-%d %H:%M:%S%.9f").to_string(),
            ],
        )?;
        Ok(())
    }

    /// Write a batch of entries in one transaction.
    ///
    /// Used by install so the critical-asset precache is all-or-nothing.
    pub fn put_batch(
        &self,
        generation: &str,
        entries: &[(String, Vec<u8>, String)],
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO cache_entries (generation, key, payload, content_type, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(generation, key) DO UPDATE SET
                 payload=excluded.payload, content_type=excluded.content_type,
                 captured_at=excluded.captured_at",
            )?;

            let captured = captured_at.format("%Y-%m-%d %H:%M:%S%.9f").to_string();
            for (key, payload, content_type) in entries {
                stmt.execute(params![generation, key, payload, content_type, captured])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Read the entry for `key` within `generation`, if present.
    pub fn get(&self, generation: &str, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT key, payload, content_type, captured_at FROM cache_entries
                 WHERE generation = ?1 AND key = ?2",
                params![generation, key],
                |row| {
                    let captured_str: String = row.get(3)?;
                    Ok(CacheEntry {
                        key: row.get(0)?,
                        payload: row.get(1)?,
                        content_type: row.get(2)?,
                        captured_at: parse_db_time(&captured_str).unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Delete every generation except `keep`. Returns the number of
    /// rows removed.
    pub fn delete_generations_except(&self, keep: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE generation != ?1",
            params![keep],
        )?;
        Ok(removed)
    }

    /// Distinct generations currently stored.
    pub fn generations(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT generation FROM cache_entries ORDER BY generation")?;
        let generations = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(generations)
    }

    /// Number of entries in `generation`.
    pub fn entry_count(&self, generation: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
            params![generation],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const GEN: &str = "test-gen-v1";

    fn open_store() -> (NamedTempFile, CacheStore) {
        let tmp = NamedTempFile::new().unwrap();
        let store = CacheStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_put_get_roundtrip_is_byte_identical() {
        let (_tmp, store) = open_store();
        let payload = br#"{"temperature":{"value":22.5,"time":1700000000}}"#;

        store
            .put(GEN, "http://host/api/latest", payload, "application/json", Utc::now())
            .unwrap();

        let entry = store.get(GEN, "http://host/api/latest").unwrap().unwrap();
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.content_type, "application/json");
    }

    #[test]
    fn test_put_overwrites_by_key() {
        let (_tmp, store) = open_store();

        store.put(GEN, "k", b"first", "text/plain", Utc::now()).unwrap();
        store.put(GEN, "k", b"second", "text/plain", Utc::now()).unwrap();

        let entry = store.get(GEN, "k").unwrap().unwrap();
        assert_eq!(entry.payload, b"second");
        assert_eq!(store.entry_count(GEN).unwrap(), 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_tmp, store) = open_store();
        assert!(store.get(GEN, "absent").unwrap().is_none());
    }

    #[test]
    fn test_delete_generations_except_keeps_current() {
        let (_tmp, store) = open_store();

        store.put("old-v0", "a", b"x", "text/plain", Utc::now()).unwrap();
        store.put("old-v0", "b", b"y", "text/plain", Utc::now()).unwrap();
        store.put(GEN, "a", b"z", "text/plain", Utc::now()).unwrap();

        let removed = store.delete_generations_except(GEN).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.generations().unwrap(), vec![GEN.to_string()]);
        assert!(store.get(GEN, "a").unwrap().is_some());
    }

    #[test]
    fn test_entry_freshness_window() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: "k".to_string(),
            payload: vec![],
            content_type: "application/json".to_string(),
            captured_at: now - chrono::Duration::seconds(20),
        };

        assert!(entry.is_fresh(Duration::from_secs(30), now));
        assert!(!entry.is_fresh(Duration::from_secs(10), now));
    }

    #[test]
    fn test_put_batch_writes_all_entries() {
        let (_tmp, store) = open_store();
        let entries = vec![
            ("/".to_string(), b"<html>".to_vec(), "text/html".to_string()),
            ("/static/css/styles.css".to_string(), b"body{}".to_vec(), "text/css".to_string()),
        ];

        store.put_batch(GEN, &entries, Utc::now()).unwrap();
        assert_eq!(store.entry_count(GEN).unwrap(), 2);
    }
}
