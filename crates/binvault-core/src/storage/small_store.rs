//! Small store
//!
//! String records over a quota-constrained [`HostStore`]. Writes never fail
//! loudly: a write that cannot be persisted after one eviction pass comes
//! back as [`WriteOutcome::NotPersisted`] and the caller keeps the data in
//! memory.
//!
//! Protected keys get extra care:
//! - a snapshot is taken before every protected write
//! - the written value is read back and compared
//! - integrity is verified afterwards, recovering from the snapshot if needed

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::backup::{is_empty_sentinel, BackupRecoveryManager, IntegrityReport, RecoveryReport};
use super::error::StorageResult;
use super::eviction::QuotaEvictionPolicy;
use super::host::HostStore;
use crate::records::{Collection, RecordRegistry};

/// Small store shared between the coordinator and attachment flows
pub type SharedSmallStore = Arc<Mutex<SmallStore>>;

/// Result of a write
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written on the first attempt
    Persisted,
    /// Written after an eviction pass removed `evicted`
    PersistedAfterEviction { evicted: Vec<String> },
    /// Not written; the caller should keep the value in memory
    NotPersisted { reason: String },
}

impl WriteOutcome {
    pub fn is_persisted(&self) -> bool {
        !matches!(self, WriteOutcome::NotPersisted { .. })
    }
}

/// Quota-aware record store
pub struct SmallStore {
    host: Box<dyn HostStore>,
    backup: BackupRecoveryManager,
    eviction: QuotaEvictionPolicy,
}

impl SmallStore {
    /// Build a store with the default eviction policy and an in-memory
    /// snapshot store
    pub fn new(host: Box<dyn HostStore>, registry: RecordRegistry) -> Self {
        Self::with_parts(
            host,
            BackupRecoveryManager::new(registry),
            QuotaEvictionPolicy::default(),
        )
    }

    pub fn with_parts(
        host: Box<dyn HostStore>,
        backup: BackupRecoveryManager,
        eviction: QuotaEvictionPolicy,
    ) -> Self {
        Self {
            host,
            backup,
            eviction,
        }
    }

    /// Wrap for sharing across async tasks
    pub fn into_shared(self) -> SharedSmallStore {
        Arc::new(Mutex::new(self))
    }

    pub fn registry(&self) -> &RecordRegistry {
        self.backup.registry()
    }

    // ==================== Reads ====================

    /// Raw value under `key`; host errors read as absent
    pub fn get(&self, key: &str) -> Option<String> {
        match self.host.read(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read '{}': {}", key, e);
                None
            }
        }
    }

    /// Parse `key` as JSON; absent, sentinel and malformed values read as `None`
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        if is_empty_sentinel(&raw) {
            return None;
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Record '{}' is corrupted, treating as empty: {}", key, e);
                None
            }
        }
    }

    /// JSON array under `key`; anything else reads as an empty collection
    pub fn get_records(&self, key: &str) -> Vec<Value> {
        match self.get_json::<Value>(key) {
            Some(Value::Array(records)) => records,
            Some(other) => {
                warn!(
                    "Record '{}' holds a {} instead of an array, treating as empty",
                    key,
                    json_type_name(&other)
                );
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn get_collection(&self, collection: Collection) -> Vec<Value> {
        self.get_records(collection.key())
    }

    /// Whether `key` holds a real (non-sentinel) value
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !is_empty_sentinel(&v))
    }

    // ==================== Writes ====================

    /// Write `value` under `key`, evicting once on quota exhaustion
    pub fn set(&mut self, key: &str, value: &str) -> WriteOutcome {
        // An empty marker would read as an integrity fault and be recovered over
        if is_empty_sentinel(value) && self.registry().is_integrity_checked(key) {
            warn!("Refusing to write an empty marker to '{}'", key);
            return WriteOutcome::NotPersisted {
                reason: format!("'{}' cannot hold an empty marker; write \"[]\" instead", key),
            };
        }

        let protected = self.registry().is_protected(key);
        if protected {
            self.backup.snapshot(self.host.as_ref());
        }

        let mut evicted = Vec::new();
        match self.host.write(key, value) {
            Ok(()) => {}
            Err(e) if e.is_quota_exceeded() => {
                warn!("Quota exceeded writing '{}', running eviction: {}", key, e);
                evicted = self.evict_for(key);

                if let Err(e) = self.host.write(key, value) {
                    error!(
                        "Write of '{}' failed after evicting {} key(s): {}",
                        key,
                        evicted.len(),
                        e
                    );
                    return WriteOutcome::NotPersisted {
                        reason: e.to_string(),
                    };
                }
            }
            Err(e) => {
                error!("Write of '{}' failed: {}", key, e);
                return WriteOutcome::NotPersisted {
                    reason: e.to_string(),
                };
            }
        }

        if protected {
            if self.get(key).as_deref() != Some(value) {
                error!("Read-back verification failed for protected key '{}'", key);
                return WriteOutcome::NotPersisted {
                    reason: format!("read-back verification failed for '{}'", key),
                };
            }
            self.ensure_integrity();
            if self.get(key).as_deref() != Some(value) {
                error!("Protected key '{}' changed during integrity repair", key);
                return WriteOutcome::NotPersisted {
                    reason: format!("'{}' did not survive integrity repair", key),
                };
            }
        }

        debug!("Wrote '{}' ({} bytes)", key, value.len());
        if evicted.is_empty() {
            WriteOutcome::Persisted
        } else {
            WriteOutcome::PersistedAfterEviction { evicted }
        }
    }

    /// Serialize `value` as JSON and write it
    pub fn set_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> WriteOutcome {
        match serde_json::to_string(value) {
            Ok(json) => self.set(key, &json),
            Err(e) => {
                error!("Failed to serialize '{}': {}", key, e);
                WriteOutcome::NotPersisted {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn set_collection(&mut self, collection: Collection, records: &[Value]) -> WriteOutcome {
        self.set_json(collection.key(), records)
    }

    /// Remove `key`; failures are logged
    pub fn remove(&mut self, key: &str) {
        if let Err(e) = self.host.delete(key) {
            warn!("Failed to remove '{}': {}", key, e);
        }
    }

    /// Remove every key, snapshotting protected keys first
    ///
    /// Until the next protected write replaces the snapshot, `recover`
    /// can bring the collections back.
    pub fn clear_all(&mut self) -> StorageResult<()> {
        self.backup.snapshot(self.host.as_ref());
        self.host.clear()?;
        info!("Cleared all small store records");
        Ok(())
    }

    // ==================== Integrity ====================

    pub fn snapshot(&mut self) {
        self.backup.snapshot(self.host.as_ref());
    }

    pub fn verify_integrity(&self) -> IntegrityReport {
        self.backup.verify_integrity(self.host.as_ref())
    }

    pub fn recover(&mut self) -> RecoveryReport {
        self.backup.recover(self.host.as_mut())
    }

    /// Verify integrity and recover if anything is missing
    ///
    /// Keys that cannot be recovered are logged and left empty.
    pub fn ensure_integrity(&mut self) -> IntegrityReport {
        let report = self.verify_integrity();
        if report.is_intact() {
            return report;
        }

        warn!("Integrity fault, missing protected keys: {:?}", report.missing);
        let recovery = self.recover();
        if !recovery.unrecoverable.is_empty() {
            error!(
                "Could not recover {:?}; continuing with empty collections",
                recovery.unrecoverable
            );
        }
        self.verify_integrity()
    }

    /// Write an empty array under every integrity-checked key with no value
    ///
    /// Returns the keys that were seeded.
    pub fn seed_missing(&mut self) -> Vec<String> {
        let mut seeded = Vec::new();
        for key in self.verify_integrity().missing {
            match self.host.write(&key, "[]") {
                Ok(()) => seeded.push(key),
                Err(e) => error!("Could not seed '{}': {}", key, e),
            }
        }
        if !seeded.is_empty() {
            self.backup.snapshot(self.host.as_ref());
        }
        seeded
    }

    /// Snapshot, evict around `key`, then check nothing protected was lost
    fn evict_for(&mut self, key: &str) -> Vec<String> {
        self.backup.snapshot(self.host.as_ref());

        let mut exclude = self.registry().protected_keys();
        exclude.insert(key.to_string());
        let evicted = self.eviction.evict(self.host.as_mut(), &exclude);

        self.ensure_integrity();
        evicted
    }

    // ==================== Diagnostics ====================

    pub fn keys(&self) -> Vec<String> {
        self.host.keys().unwrap_or_else(|e| {
            warn!("Failed to list keys: {}", e);
            Vec::new()
        })
    }

    pub fn used_bytes(&self) -> StorageResult<u64> {
        self.host.used_bytes()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.host.capacity_bytes()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
