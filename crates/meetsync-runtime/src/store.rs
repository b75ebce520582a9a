//! Small keyed JSON records that survive daemon restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ─── Memory ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.records.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().await.remove(key);
        Ok(())
    }
}

// ─── SQLite ──────────────────────────────────────────────────────

/// SQLite-backed record store. One row per key, value stored as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    key        TEXT PRIMARY KEY,
                    value      TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );",
            )?;
            Ok(())
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
                .transpose()
        })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(&value)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, text, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
            Ok(())
        })
    }
}

/// `$XDG_STATE_HOME/meetsync/state.db`, else `~/.local/state/meetsync/state.db`.
pub fn default_state_db_path() -> PathBuf {
    if let Some(dir) = std::env::var("XDG_STATE_HOME").ok().filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("meetsync/state.db");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".local/state/meetsync/state.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_in_memory_creates_table() {
        let store = SqliteStore::open_in_memory().expect("should open in-memory db");
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?)
            })
            .expect("records table should exist");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn set_get_remove() {
        let store = SqliteStore::open_in_memory().expect("store");
        assert_eq!(store.get("applied_rooms").await.expect("get"), None);

        let value = json!({"abc-defg-hij": {"observer": 1}});
        store.set("applied_rooms", value.clone()).await.expect("set");
        assert_eq!(store.get("applied_rooms").await.expect("get"), Some(value));

        store.remove("applied_rooms").await.expect("remove");
        assert_eq!(store.get("applied_rooms").await.expect("get"), None);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let store = SqliteStore::open_in_memory().expect("store");
        store.set("k", json!(1)).await.expect("set");
        store.set("k", json!({"v": 2})).await.expect("set again");

        assert_eq!(store.get("k").await.expect("get"), Some(json!({"v": 2})));
        let rows: i64 = store
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?))
            .expect("count");
        assert_eq!(rows, 1, "upsert should not create duplicate rows");
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state/state.db");
        {
            let store = SqliteStore::open(&path).expect("open");
            store.set("applied_rooms", json!({"abc-defg-hij": {}})).await.expect("set");
        }
        let reopened = SqliteStore::open(&path).expect("reopen");
        assert!(reopened.get("applied_rooms").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set("k", json!("v")).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(json!("v")));
        store.remove("k").await.expect("remove");
        assert_eq!(store.get("k").await.expect("get"), None);
    }
}
