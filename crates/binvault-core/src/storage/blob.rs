//! Blob store for attachments
//!
//! Photos and documents are too large for the small store. They live in a
//! separate SQLite file, one row per blob, keyed by a generated id and
//! owned by an `(entity_id, entity_type)` pair. Ownership is part of the
//! blob row, so creating a blob and recording its owner is one transaction.
//!
//! SQLite work runs on the blocking pool; every method is async.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};

const BLOB_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS blobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT UNIQUE NOT NULL,
        entity_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        data BLOB NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_blobs_owner ON blobs(entity_type, entity_id);
"#;

/// A stored attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    pub id: String,
    pub entity_id: String,
    pub entity_type: String,
    /// Raw bytes; base64 text when serialized
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Async attachment store
#[derive(Clone)]
pub struct BlobStore {
    conn: Arc<Mutex<Connection>>,
    capacity: u64,
}

impl BlobStore {
    /// Open or create the blob database at `path`
    pub fn open(path: &Path, capacity: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(BLOB_SCHEMA)?;
        debug!("Opened blob store at {:?}", path);
        Ok(Self::from_connection(conn, capacity))
    }

    /// Open an in-memory blob store (for testing)
    pub fn open_in_memory(capacity: u64) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(BLOB_SCHEMA)?;
        Ok(Self::from_connection(conn, capacity))
    }

    fn from_connection(conn: Connection, capacity: u64) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            capacity,
        }
    }

    /// Estimated capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::TaskJoin(e.to_string()))?
    }

    /// Store `data` for an entity and return the new blob id
    pub async fn put(
        &self,
        entity_id: &str,
        entity_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let id = Uuid::new_v4().to_string();
        let entity_id = entity_id.to_string();
        let entity_type = entity_type.to_string();
        let capacity = self.capacity;

        let blob_id = id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let used: i64 =
                tx.query_row("SELECT COALESCE(SUM(length(data)), 0) FROM blobs", [], |row| {
                    row.get(0)
                })?;
            let used = used.max(0) as u64;
            let needed = data.len() as u64;
            if used.saturating_add(needed) > capacity {
                return Err(StorageError::QuotaExceeded {
                    key: format!("{}/{}", entity_type, entity_id),
                    needed,
                    available: capacity.saturating_sub(used),
                    capacity,
                });
            }

            tx.execute(
                "INSERT INTO blobs (id, entity_id, entity_type, data, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    blob_id,
                    entity_id,
                    entity_type,
                    data,
                    Utc::now().timestamp_millis()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!("Stored blob {}", id);
        Ok(id)
    }

    /// Fetch one blob by id
    pub async fn get(&self, blob_id: &str) -> StorageResult<Option<BlobRecord>> {
        let blob_id = blob_id.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, entity_id, entity_type, data, created_at FROM blobs WHERE id = ?",
                    params![blob_id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// Every blob owned by an entity, in insertion order
    pub async fn records_for_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> StorageResult<Vec<BlobRecord>> {
        let entity_id = entity_id.to_string();
        let entity_type = entity_type.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, entity_id, entity_type, data, created_at FROM blobs \
                 WHERE entity_id = ?1 AND entity_type = ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![entity_id, entity_type], row_to_record)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
    }

    /// Data of every blob owned by an entity, in insertion order
    pub async fn get_all(&self, entity_id: &str, entity_type: &str) -> StorageResult<Vec<Vec<u8>>> {
        let records = self.records_for_entity(entity_id, entity_type).await?;
        Ok(records.into_iter().map(|r| r.data).collect())
    }

    /// `(id, data)` of every blob owned by an entity, in insertion order
    pub async fn get_all_with_ids(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let records = self.records_for_entity(entity_id, entity_type).await?;
        Ok(records.into_iter().map(|r| (r.id, r.data)).collect())
    }

    /// Ids of every blob owned by an entity, without loading the data
    pub async fn ids_for_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> StorageResult<Vec<String>> {
        let entity_id = entity_id.to_string();
        let entity_type = entity_type.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM blobs WHERE entity_id = ?1 AND entity_type = ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![entity_id, entity_type], |row| row.get(0))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
    }

    /// Delete one blob; `false` when it did not exist
    pub async fn delete(&self, blob_id: &str) -> StorageResult<bool> {
        let id = blob_id.to_string();
        let removed = self
            .with_conn(move |conn| Ok(conn.execute("DELETE FROM blobs WHERE id = ?", params![id])?))
            .await?;
        Ok(removed > 0)
    }

    /// Delete every blob owned by an entity, returning how many were removed
    pub async fn delete_all_for_entity(
        &self,
        entity_id: &str,
        entity_type: &str,
    ) -> StorageResult<usize> {
        let owner = format!("{}/{}", entity_type, entity_id);
        let entity_id = entity_id.to_string();
        let entity_type = entity_type.to_string();
        let removed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let removed = tx.execute(
                    "DELETE FROM blobs WHERE entity_id = ?1 AND entity_type = ?2",
                    params![entity_id, entity_type],
                )?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            info!("Deleted {} blob(s) owned by {}", removed, owner);
        }
        Ok(removed)
    }

    /// Bytes of blob data stored
    pub async fn usage(&self) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let used: i64 =
                conn.query_row("SELECT COALESCE(SUM(length(data)), 0) FROM blobs", [], |row| {
                    row.get(0)
                })?;
            Ok(used.max(0) as u64)
        })
        .await
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlobRecord> {
    let created_ms: i64 = row.get(4)?;
    Ok(BlobRecord {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        entity_type: row.get(2)?,
        data: row.get(3)?,
        created_at: Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> BlobStore {
        BlobStore::open_in_memory(1024 * 1024).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_all_delete_round_trip() {
        let blobs = store();

        let id = blobs.put("bin-1", "bin", b"photo-bytes".to_vec()).await.unwrap();
        let all = blobs.get_all("bin-1", "bin").await.unwrap();
        assert!(all.contains(&b"photo-bytes".to_vec()));

        assert!(blobs.delete(&id).await.unwrap());
        let all = blobs.get_all("bin-1", "bin").await.unwrap();
        assert!(!all.contains(&b"photo-bytes".to_vec()));

        assert!(!blobs.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_ordered() {
        let blobs = store();
        let first = blobs.put("d-1", "driver", vec![1]).await.unwrap();
        let second = blobs.put("d-1", "driver", vec![2]).await.unwrap();
        let third = blobs.put("d-1", "driver", vec![3]).await.unwrap();
        assert_ne!(first, second);

        let with_ids = blobs.get_all_with_ids("d-1", "driver").await.unwrap();
        assert_eq!(
            with_ids,
            vec![(first.clone(), vec![1]), (second.clone(), vec![2]), (third.clone(), vec![3])]
        );
        assert_eq!(
            blobs.ids_for_entity("d-1", "driver").await.unwrap(),
            vec![first, second, third]
        );
    }

    #[tokio::test]
    async fn test_owner_is_entity_id_and_type() {
        let blobs = store();
        blobs.put("42", "bin", vec![1]).await.unwrap();
        blobs.put("42", "driver", vec![2]).await.unwrap();

        assert_eq!(blobs.get_all("42", "bin").await.unwrap(), vec![vec![1]]);
        assert_eq!(blobs.get_all("42", "driver").await.unwrap(), vec![vec![2]]);
        assert!(blobs.get_all("43", "bin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_for_entity_cascades() {
        let blobs = store();
        blobs.put("c-9", "container", vec![1, 2]).await.unwrap();
        blobs.put("c-9", "container", vec![3]).await.unwrap();
        let other = blobs.put("c-10", "container", vec![4]).await.unwrap();

        let removed = blobs.delete_all_for_entity("c-9", "container").await.unwrap();
        assert_eq!(removed, 2);
        assert!(blobs.get_all("c-9", "container").await.unwrap().is_empty());
        assert!(blobs.get(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_usage_and_capacity() {
        let blobs = BlobStore::open_in_memory(10).unwrap();
        assert_eq!(blobs.usage().await.unwrap(), 0);

        blobs.put("b", "bale", vec![0; 6]).await.unwrap();
        assert_eq!(blobs.usage().await.unwrap(), 6);

        let err = blobs.put("b", "bale", vec![0; 6]).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(blobs.get_all("b", "bale").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_returns_full_record() {
        let blobs = store();
        let id = blobs.put("pr-1", "pickup_request", b"doc".to_vec()).await.unwrap();

        let record = blobs.get(&id).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.entity_id, "pr-1");
        assert_eq!(record.entity_type, "pickup_request");
        assert_eq!(record.data, b"doc");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data"], "ZG9j");
        assert_eq!(json["entityType"], "pickup_request");
    }

    #[tokio::test]
    async fn test_persists_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blobs.db");

        let id = {
            let blobs = BlobStore::open(&path, 1024).unwrap();
            blobs.put("bin-1", "bin", vec![9, 9]).await.unwrap()
        };

        let blobs = BlobStore::open(&path, 1024).unwrap();
        assert_eq!(blobs.get(&id).await.unwrap().unwrap().data, vec![9, 9]);
    }
}
