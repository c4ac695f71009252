//! Storage usage reporting

use serde::Serialize;
use tracing::warn;

use crate::storage::{BlobStore, SharedSmallStore};

/// Bytes used and estimated capacity of both tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub small_store_bytes: u64,
    pub blob_store_bytes: u64,
    pub small_store_capacity: u64,
    pub blob_store_capacity: u64,
}

impl StorageUsage {
    /// Fraction of the small store quota in use, 0.0 when unknown
    pub fn small_store_ratio(&self) -> f64 {
        if self.small_store_capacity == 0 {
            return 0.0;
        }
        self.small_store_bytes as f64 / self.small_store_capacity as f64
    }

    pub fn blob_store_ratio(&self) -> f64 {
        if self.blob_store_capacity == 0 {
            return 0.0;
        }
        self.blob_store_bytes as f64 / self.blob_store_capacity as f64
    }

    /// Whether either tier is past `threshold` of its capacity
    pub fn is_under_pressure(&self, threshold: f64) -> bool {
        self.small_store_ratio() >= threshold || self.blob_store_ratio() >= threshold
    }

    pub fn total_bytes(&self) -> u64 {
        self.small_store_bytes + self.blob_store_bytes
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Reads usage from both stores without side effects
#[derive(Clone)]
pub struct StorageUsageReporter {
    small: SharedSmallStore,
    blobs: BlobStore,
}

impl StorageUsageReporter {
    pub fn new(small: SharedSmallStore, blobs: BlobStore) -> Self {
        Self { small, blobs }
    }

    /// Current usage; a source that cannot be read counts as 0
    pub async fn usage(&self) -> StorageUsage {
        let (small_store_bytes, small_store_capacity) = {
            let small = self.small.lock().await;
            let used = small.used_bytes().unwrap_or_else(|e| {
                warn!("Could not measure small store usage: {}", e);
                0
            });
            (used, small.capacity_bytes())
        };

        let blob_store_bytes = self.blobs.usage().await.unwrap_or_else(|e| {
            warn!("Could not measure blob store usage: {}", e);
            0
        });

        StorageUsage {
            small_store_bytes,
            blob_store_bytes,
            small_store_capacity,
            blob_store_capacity: self.blobs.capacity_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordRegistry;
    use crate::storage::{MemoryHostStore, SmallStore};

    #[tokio::test]
    async fn test_usage_reflects_both_tiers() {
        let mut small = SmallStore::new(
            Box::new(MemoryHostStore::with_capacity(1_000)),
            RecordRegistry::standard(),
        );
        assert!(small.set("bins", "[1,2]").is_persisted());
        let blobs = BlobStore::open_in_memory(10_000).unwrap();
        blobs.put("b1", "bin", vec![0; 250]).await.unwrap();

        let reporter = StorageUsageReporter::new(small.into_shared(), blobs);
        let usage = reporter.usage().await;

        assert_eq!(usage.small_store_bytes, ("bins".len() + "[1,2]".len()) as u64);
        assert_eq!(usage.small_store_capacity, 1_000);
        assert_eq!(usage.blob_store_bytes, 250);
        assert_eq!(usage.blob_store_capacity, 10_000);
        assert_eq!(usage.total_bytes(), 259);

        // Reading usage changes nothing
        assert_eq!(reporter.usage().await, usage);
    }

    #[test]
    fn test_ratios_and_pressure() {
        let usage = StorageUsage {
            small_store_bytes: 900,
            small_store_capacity: 1_000,
            blob_store_bytes: 10,
            blob_store_capacity: 1_000,
        };
        assert!((usage.small_store_ratio() - 0.9).abs() < f64::EPSILON);
        assert!(usage.is_under_pressure(0.8));
        assert!(!usage.is_under_pressure(0.95));

        assert_eq!(StorageUsage::default().small_store_ratio(), 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
