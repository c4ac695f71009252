//! Quota eviction
//!
//! When a write hits the quota, the largest evictable entries are removed.
//! The pass removes a fixed number of entries rather than looping until a
//! size target is met; one pass is usually enough to fit a collection update.

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use super::host::HostStore;

/// Entries removed per pass unless configured otherwise
pub const DEFAULT_EVICTION_BATCH: usize = 3;

/// Chooses and removes non-protected keys under quota pressure
#[derive(Debug, Clone)]
pub struct QuotaEvictionPolicy {
    batch_size: usize,
}

impl Default for QuotaEvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_BATCH)
    }
}

impl QuotaEvictionPolicy {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Remove the largest keys not in `exclude`, returning what was removed
    pub fn evict(&self, host: &mut dyn HostStore, exclude: &BTreeSet<String>) -> Vec<String> {
        let keys = match host.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Eviction could not enumerate keys: {}", e);
                return Vec::new();
            }
        };

        let mut candidates: Vec<(String, usize)> = keys
            .into_iter()
            .filter(|key| !exclude.contains(key))
            .filter_map(|key| match host.read(&key) {
                Ok(Some(value)) => Some((key, value.len())),
                Ok(None) => None,
                Err(e) => {
                    warn!("Eviction could not size '{}': {}", key, e);
                    None
                }
            })
            .collect();

        candidates.sort_by(|(ka, sa), (kb, sb)| sb.cmp(sa).then_with(|| ka.cmp(kb)));

        let mut evicted = Vec::new();
        for (key, size) in candidates.into_iter().take(self.batch_size) {
            if exclude.contains(&key) {
                error!("Refusing to evict protected key '{}'", key);
                continue;
            }
            match host.delete(&key) {
                Ok(()) => {
                    info!("Evicted '{}' ({} bytes) to free quota", key, size);
                    evicted.push(key);
                }
                Err(e) => warn!("Failed to evict '{}': {}", key, e),
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordRegistry;
    use crate::storage::host::MemoryHostStore;

    fn host_with(entries: &[(&str, usize)]) -> MemoryHostStore {
        let mut host = MemoryHostStore::unbounded();
        for (key, size) in entries {
            host.write(key, &"x".repeat(*size)).unwrap();
        }
        host
    }

    #[test]
    fn test_evicts_three_largest_by_count() {
        let mut host = host_with(&[("a", 10), ("b", 500), ("c", 40), ("d", 300), ("e", 20)]);
        let policy = QuotaEvictionPolicy::default();

        let evicted = policy.evict(&mut host, &BTreeSet::new());

        assert_eq!(evicted, vec!["b", "d", "c"]);
        assert_eq!(host.keys().unwrap(), vec!["a", "e"]);
    }

    #[test]
    fn test_never_evicts_protected_keys_even_when_largest() {
        let registry = RecordRegistry::standard();
        let mut host = host_with(&[
            ("bins", 5_000),
            ("drivers", 4_000),
            ("bales", 3_000),
            ("_tmp_cache", 10),
        ]);
        let policy = QuotaEvictionPolicy::default();
        let exclude = registry.protected_keys();

        for _ in 0..5 {
            policy.evict(&mut host, &exclude);
        }

        let keys = host.keys().unwrap();
        assert!(keys.contains(&"bins".to_string()));
        assert!(keys.contains(&"drivers".to_string()));
        assert!(keys.contains(&"bales".to_string()));
        assert!(!keys.contains(&"_tmp_cache".to_string()));
    }

    #[test]
    fn test_excluded_write_target_survives() {
        let mut host = host_with(&[("pref_default_assignee", 900), ("other", 10)]);
        let policy = QuotaEvictionPolicy::new(5);
        let exclude: BTreeSet<String> = ["pref_default_assignee".to_string()].into();

        let evicted = policy.evict(&mut host, &exclude);

        assert_eq!(evicted, vec!["other"]);
        assert!(host.read("pref_default_assignee").unwrap().is_some());
    }

    #[test]
    fn test_ties_break_by_key() {
        let mut host = host_with(&[("z", 5), ("y", 5), ("x", 5), ("w", 5)]);
        let policy = QuotaEvictionPolicy::default();

        let evicted = policy.evict(&mut host, &BTreeSet::new());
        assert_eq!(evicted, vec!["w", "x", "y"]);
    }

    #[test]
    fn test_empty_store_evicts_nothing() {
        let mut host = MemoryHostStore::unbounded();
        let evicted = QuotaEvictionPolicy::default().evict(&mut host, &BTreeSet::new());
        assert!(evicted.is_empty());
    }
}
