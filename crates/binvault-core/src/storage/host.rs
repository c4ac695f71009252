//! Host key/value stores
//!
//! A [`HostStore`] is the synchronous, quota-constrained store the small
//! store sits on. Two hosts are provided:
//!
//! - [`SqliteHostStore`] - durable, one SQLite file, quota enforced on write
//! - [`MemoryHostStore`] - process-lifetime map, used for the volatile
//!   snapshot store and in tests
//!
//! Sizes are byte lengths of key plus value.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::error::{StorageError, StorageResult};

/// Synchronous key/value store with a hard capacity
pub trait HostStore: Send {
    /// Read a value; `Ok(None)` when the key is absent
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, failing with [`StorageError::QuotaExceeded`] when it
    /// does not fit
    fn write(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key; removing an absent key is not an error
    fn delete(&mut self, key: &str) -> StorageResult<()>;

    /// Every key currently stored
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Bytes currently used
    fn used_bytes(&self) -> StorageResult<u64>;

    /// Hard capacity in bytes
    fn capacity_bytes(&self) -> u64;

    /// Remove every key
    fn clear(&mut self) -> StorageResult<()> {
        for key in self.keys()? {
            self.delete(&key)?;
        }
        Ok(())
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

fn check_quota(
    key: &str,
    value: &str,
    used_without_key: u64,
    capacity: u64,
) -> StorageResult<()> {
    let needed = entry_size(key, value);
    if used_without_key.saturating_add(needed) > capacity {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            needed,
            available: capacity.saturating_sub(used_without_key),
            capacity,
        });
    }
    Ok(())
}

/// In-memory host store
#[derive(Debug, Clone)]
pub struct MemoryHostStore {
    entries: BTreeMap<String, String>,
    capacity: u64,
}

impl Default for MemoryHostStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl MemoryHostStore {
    /// A store that never reports quota exhaustion
    pub fn unbounded() -> Self {
        Self::with_capacity(u64::MAX)
    }

    /// A store limited to `capacity` bytes
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    fn used(&self) -> u64 {
        self.entries.iter().map(|(k, v)| entry_size(k, v)).sum()
    }
}

impl HostStore for MemoryHostStore {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let existing = self
            .entries
            .get(key)
            .map(|v| entry_size(key, v))
            .unwrap_or(0);
        check_quota(key, value, self.used() - existing, self.capacity)?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn used_bytes(&self) -> StorageResult<u64> {
        Ok(self.used())
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// SQLite-backed host store
///
/// Each write runs in its own transaction, so a rejected or failed write
/// leaves the previous value in place.
pub struct SqliteHostStore {
    conn: Connection,
    capacity: u64,
}

const KV_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

impl SqliteHostStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path, capacity: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(KV_SCHEMA)?;
        debug!("Opened small store host at {:?} (capacity {} bytes)", path, capacity);
        Ok(Self { conn, capacity })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(capacity: u64) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KV_SCHEMA)?;
        Ok(Self { conn, capacity })
    }
}

const USED_BYTES_SQL: &str =
    "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) FROM kv";

impl HostStore for SqliteHostStore {
    fn read(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn write(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let used_without_key: i64 = tx.query_row(
            "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) \
             FROM kv WHERE key <> ?",
            params![key],
            |row| row.get(0),
        )?;
        check_quota(key, value, used_without_key.max(0) as u64, self.capacity)?;

        tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn used_bytes(&self) -> StorageResult<u64> {
        let used: i64 = self.conn.query_row(USED_BYTES_SQL, [], |row| row.get(0))?;
        Ok(used.max(0) as u64)
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }
}
