//! Emergency snapshot and recovery of protected records
//!
//! Before anything that can lose data (a protected write, an eviction pass,
//! a clear-all) the current value of every protected key is copied into a
//! volatile store. If a protected key later turns up missing, `recover`
//! writes the snapshot's copy back.
//!
//! This is a point-in-time restore, not a merge: anything written after the
//! last snapshot and then lost is gone.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::host::{HostStore, MemoryHostStore};
use crate::records::RecordRegistry;

/// Key of the single snapshot in the volatile store
pub const SNAPSHOT_KEY: &str = "__protected_snapshot";

/// Values the serialization layer produces for "nothing"
pub fn is_empty_sentinel(value: &str) -> bool {
    matches!(value.trim(), "" | "undefined" | "null")
}

/// Point-in-time copy of the protected keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,
}

/// Outcome of an integrity check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Integrity-checked keys that are absent or hold an empty sentinel
    pub missing: Vec<String>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Outcome of a recovery attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub restored: Vec<String>,
    /// Missing keys the snapshot could not supply
    pub unrecoverable: Vec<String>,
}

impl RecoveryReport {
    pub fn recovered_any(&self) -> bool {
        !self.restored.is_empty()
    }
}

/// Snapshots protected keys into a volatile store and restores them
pub struct BackupRecoveryManager {
    registry: RecordRegistry,
    volatile: Box<dyn HostStore>,
}

impl BackupRecoveryManager {
    /// Manager backed by a process-lifetime in-memory store
    pub fn new(registry: RecordRegistry) -> Self {
        Self::with_volatile(registry, Box::new(MemoryHostStore::unbounded()))
    }

    /// Manager backed by a caller-supplied volatile store
    pub fn with_volatile(registry: RecordRegistry, volatile: Box<dyn HostStore>) -> Self {
        Self { registry, volatile }
    }

    pub fn registry(&self) -> &RecordRegistry {
        &self.registry
    }

    /// Copy every present protected key into the volatile store
    ///
    /// Overwrites the previous snapshot. Failures are logged, never returned.
    pub fn snapshot(&mut self, host: &dyn HostStore) {
        let mut values = BTreeMap::new();
        for key in self.registry.protected_keys() {
            match host.read(&key) {
                Ok(Some(value)) => {
                    values.insert(key, value);
                }
                Ok(None) => {}
                Err(e) => warn!("Snapshot could not read '{}': {}", key, e),
            }
        }

        let snapshot = Snapshot {
            timestamp: Utc::now(),
            values,
        };
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize protected snapshot: {}", e);
                return;
            }
        };

        match self.volatile.write(SNAPSHOT_KEY, &json) {
            Ok(()) => debug!(
                "Protected snapshot taken ({} keys, {} bytes)",
                snapshot.values.len(),
                json.len()
            ),
            Err(e) => warn!("Failed to store protected snapshot: {}", e),
        }
    }

    /// The most recent snapshot, if one exists and parses
    pub fn last_snapshot(&self) -> Option<Snapshot> {
        let raw = match self.volatile.read(SNAPSHOT_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read protected snapshot: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Protected snapshot is corrupted: {}", e);
                None
            }
        }
    }

    /// Check that every integrity-checked key holds a real value
    pub fn verify_integrity(&self, host: &dyn HostStore) -> IntegrityReport {
        let missing = self
            .registry
            .integrity_keys()
            .filter(|key| match host.read(key) {
                Ok(Some(value)) => is_empty_sentinel(&value),
                Ok(None) => true,
                Err(e) => {
                    warn!("Integrity check could not read '{}': {}", key, e);
                    true
                }
            })
            .map(str::to_string)
            .collect();

        IntegrityReport { missing }
    }

    /// Restore missing integrity-checked keys from the last snapshot
    ///
    /// Writes go straight to the host so that restoring one key never
    /// replaces the snapshot the remaining keys are read from.
    pub fn recover(&self, host: &mut dyn HostStore) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let missing = self.verify_integrity(host).missing;
        if missing.is_empty() {
            return report;
        }

        let Some(snapshot) = self.last_snapshot() else {
            warn!("No protected snapshot available; {} key(s) stay empty", missing.len());
            report.unrecoverable = missing;
            return report;
        };

        for key in missing {
            let value = match snapshot.values.get(&key) {
                Some(value) if !is_empty_sentinel(value) => value,
                _ => {
                    warn!("Snapshot has no usable value for '{}'", key);
                    report.unrecoverable.push(key);
                    continue;
                }
            };

            match host.write(&key, value) {
                Ok(()) => {
                    info!(
                        "Recovered '{}' from snapshot taken at {}",
                        key, snapshot.timestamp
                    );
                    report.restored.push(key);
                }
                Err(e) => {
                    error!("Failed to restore '{}' from snapshot: {}", key, e);
                    report.unrecoverable.push(key);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::AUTH_MARKER_KEY;

    fn seeded_host() -> MemoryHostStore {
        let mut host = MemoryHostStore::unbounded();
        host.write("drivers", r#"[{"id":"d1"}]"#).unwrap();
        host.write("bins", r#"[{"id":"b1"},{"id":"b2"}]"#).unwrap();
        host.write("containers", "[]").unwrap();
        host.write("bales", r#"[{"id":"x"}]"#).unwrap();
        host.write("pickup_requests", "[]").unwrap();
        host.write("_tmp_cache", "scratch").unwrap();
        host
    }

    #[test]
    fn test_sentinels() {
        assert!(is_empty_sentinel(""));
        assert!(is_empty_sentinel("undefined"));
        assert!(is_empty_sentinel("null"));
        assert!(!is_empty_sentinel("[]"));
    }

    #[test]
    fn test_snapshot_captures_only_protected_keys() {
        let host = seeded_host();
        let mut backup = BackupRecoveryManager::new(RecordRegistry::standard());

        backup.snapshot(&host);
        let snapshot = backup.last_snapshot().unwrap();

        assert_eq!(snapshot.values.get("bins").unwrap(), r#"[{"id":"b1"},{"id":"b2"}]"#);
        assert!(!snapshot.values.contains_key("_tmp_cache"));
        assert!(!snapshot.values.contains_key(AUTH_MARKER_KEY));
    }

    #[test]
    fn test_snapshot_serializes_timestamp_alongside_keys() {
        let host = seeded_host();
        let mut backup = BackupRecoveryManager::new(RecordRegistry::standard());
        backup.snapshot(&host);

        let raw = backup.volatile.read(SNAPSHOT_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("timestamp").is_some());
        assert!(value.get("drivers").is_some());
    }

    #[test]
    fn test_verify_integrity_flags_missing_and_sentinel_values() {
        let mut host = seeded_host();
        let backup = BackupRecoveryManager::new(RecordRegistry::standard());
        assert!(backup.verify_integrity(&host).is_intact());

        host.delete("drivers").unwrap();
        host.write("bins", "undefined").unwrap();

        let report = backup.verify_integrity(&host);
        assert!(!report.is_intact());
        assert_eq!(report.missing, vec!["drivers", "bins"]);
    }

    #[test]
    fn test_auth_marker_absence_is_not_a_fault() {
        let host = seeded_host();
        let backup = BackupRecoveryManager::new(RecordRegistry::standard());
        assert!(host.read(AUTH_MARKER_KEY).unwrap().is_none());
        assert!(backup.verify_integrity(&host).is_intact());
    }

    #[test]
    fn test_snapshot_then_recover_restores_exact_value() {
        let mut host = seeded_host();
        let mut backup = BackupRecoveryManager::new(RecordRegistry::standard());
        let original = host.read("bales").unwrap().unwrap();

        backup.snapshot(&host);
        host.delete("bales").unwrap();

        let report = backup.recover(&mut host);
        assert!(report.recovered_any());
        assert_eq!(report.restored, vec!["bales"]);
        assert_eq!(host.read("bales").unwrap().unwrap(), original);
    }

    #[test]
    fn test_recover_without_snapshot_reports_unrecoverable() {
        let mut host = seeded_host();
        let backup = BackupRecoveryManager::new(RecordRegistry::standard());
        host.delete("drivers").unwrap();

        let report = backup.recover(&mut host);
        assert!(!report.recovered_any());
        assert_eq!(report.unrecoverable, vec!["drivers"]);
    }

    #[test]
    fn test_recover_is_point_in_time() {
        let mut host = seeded_host();
        let mut backup = BackupRecoveryManager::new(RecordRegistry::standard());

        backup.snapshot(&host);
        host.write("drivers", r#"[{"id":"d1"},{"id":"d2"}]"#).unwrap();
        host.delete("drivers").unwrap();

        backup.recover(&mut host);
        // The write made after the snapshot is not resurrected
        assert_eq!(host.read("drivers").unwrap().unwrap(), r#"[{"id":"d1"}]"#);
    }

    #[test]
    fn test_recover_leaves_present_keys_alone() {
        let mut host = seeded_host();
        let mut backup = BackupRecoveryManager::new(RecordRegistry::standard());

        backup.snapshot(&host);
        host.write("bins", "[]").unwrap();

        let report = backup.recover(&mut host);
        assert!(!report.recovered_any());
        assert_eq!(host.read("bins").unwrap().unwrap(), "[]");
    }
}
