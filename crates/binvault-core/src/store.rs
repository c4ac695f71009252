//! Unified storage interface
//!
//! The `Store` wires the local state layer together from a [`Config`]:
//! - the small store over `smallstore.db`, quota-limited
//! - the blob store over `blobs.db`
//! - the sync coordinator, with an HTTP remote when one is enabled
//! - the attachment linker and usage reporter
//!
//! ## Opening
//!
//! Opening checks that every protected collection is present. Missing ones
//! are recovered where possible and otherwise start out empty, which is also
//! what happens on first run.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! let bins = store.coordinator().read(Collection::Bins).await;
//! store.attachments().attach(Collection::Bins, "b1", "photos", bytes).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attachments::{entity_id_of, AttachmentLinker, Reconciliation};
use crate::config::Config;
use crate::records::{Collection, RecordRegistry};
use crate::remote::{HttpRemote, RemoteService};
use crate::storage::{
    BackupRecoveryManager, BlobStore, IntegrityReport, QuotaEvictionPolicy, RecoveryReport,
    SharedSmallStore, SmallStore, SqliteHostStore,
};
use crate::sync::HybridSyncCoordinator;
use crate::usage::{StorageUsage, StorageUsageReporter};

/// Point-in-time dump of the cached collections
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub exported_at: DateTime<Utc>,
    pub collections: BTreeMap<String, Vec<Value>>,
    pub usage: StorageUsage,
}

/// What deleting an entity removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRemoval {
    /// Whether the entity was in the local cache
    pub existed: bool,
    pub blobs_removed: usize,
}

/// Unified storage interface for binvault
pub struct Store {
    config: Config,
    small: SharedSmallStore,
    blobs: BlobStore,
    coordinator: HybridSyncCoordinator,
    attachments: AttachmentLinker,
    usage: StorageUsageReporter,
}

impl Store {
    /// Open the store using the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    pub fn open_with_config(config: Config) -> Result<Self> {
        let host = SqliteHostStore::open(&config.small_store_path(), config.small_store_quota_bytes)
            .context("Failed to open small store")?;
        let mut small = SmallStore::with_parts(
            Box::new(host),
            BackupRecoveryManager::new(RecordRegistry::standard()),
            QuotaEvictionPolicy::new(config.eviction_batch_size),
        );
        check_on_open(&mut small);
        let small = small.into_shared();

        let blobs = BlobStore::open(&config.blob_store_path(), config.blob_store_quota_bytes)
            .context("Failed to open blob store")?;

        let remote: Option<Arc<dyn RemoteService>> = match config.active_remote_url() {
            Some(url) => {
                let remote = HttpRemote::new(url, config.remote_timeout())
                    .with_context(|| format!("Failed to create remote client for {}", url))?;
                debug!("Remote enabled at {}", url);
                Some(Arc::new(remote))
            }
            None => None,
        };

        let coordinator =
            HybridSyncCoordinator::new(small.clone(), remote, config.coordinator_options());
        let attachments = AttachmentLinker::new(small.clone(), blobs.clone());
        let usage = StorageUsageReporter::new(small.clone(), blobs.clone());

        Ok(Self {
            config,
            small,
            blobs,
            coordinator,
            attachments,
            usage,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &HybridSyncCoordinator {
        &self.coordinator
    }

    pub fn attachments(&self) -> &AttachmentLinker {
        &self.attachments
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn small_store(&self) -> &SharedSmallStore {
        &self.small
    }

    /// Start background probing if `probe_interval_secs` is set
    pub fn start_background_probe(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.probe_interval()?;
        if !self.coordinator.has_remote() {
            return None;
        }
        info!("Probing remote every {:?}", interval);
        Some(self.coordinator.spawn_probe_task(interval))
    }

    // ==================== Entities ====================

    /// Delete an entity and every blob it owns
    pub async fn delete_entity(&self, collection: Collection, id: &str) -> Result<EntityRemoval> {
        let existed = self.coordinator.delete(collection, id).await;
        let blobs_removed = self
            .attachments
            .remove_entity(collection, id)
            .await
            .with_context(|| format!("Failed to remove attachments of {} '{}'", collection, id))?;

        Ok(EntityRemoval {
            existed,
            blobs_removed,
        })
    }

    /// Reconcile the attachment list `field` of every cached entity
    ///
    /// Returns the entities whose list changed.
    pub async fn repair_attachments(
        &self,
        collection: Collection,
        field: &str,
    ) -> Result<Vec<(String, Reconciliation)>> {
        let ids: Vec<String> = {
            let small = self.small.lock().await;
            small
                .get_collection(collection)
                .iter()
                .filter_map(entity_id_of)
                .collect()
        };

        let mut repaired = Vec::new();
        for id in ids {
            let result = self
                .attachments
                .reconcile(collection, &id, field)
                .await
                .with_context(|| format!("Failed to reconcile {} '{}'", collection, id))?;
            if result.changed() {
                repaired.push((id, result));
            }
        }
        Ok(repaired)
    }

    // ==================== Integrity ====================

    pub async fn verify_integrity(&self) -> IntegrityReport {
        self.small.lock().await.verify_integrity()
    }

    pub async fn recover(&self) -> RecoveryReport {
        self.small.lock().await.recover()
    }

    /// Remove every small store record
    ///
    /// Protected collections can be recovered until the next protected write.
    pub async fn clear_all(&self) -> Result<()> {
        self.small
            .lock()
            .await
            .clear_all()
            .context("Failed to clear small store")
    }

    // ==================== Stats ====================

    pub async fn usage(&self) -> StorageUsage {
        self.usage.usage().await
    }

    /// Dump every cached collection
    pub async fn export(&self) -> Export {
        let collections = {
            let small = self.small.lock().await;
            Collection::ALL
                .into_iter()
                .map(|c| (c.key().to_string(), small.get_collection(c)))
                .collect()
        };

        Export {
            exported_at: Utc::now(),
            collections,
            usage: self.usage().await,
        }
    }
}

/// Recover missing protected collections, starting the rest empty
fn check_on_open(small: &mut SmallStore) {
    let report = small.verify_integrity();
    if report.is_intact() {
        return;
    }

    if small.keys().is_empty() {
        info!("Initializing new store");
    } else {
        warn!("Protected records missing on open: {:?}", report.missing);
    }

    let recovery = small.recover();
    if recovery.recovered_any() {
        info!("Recovered {:?} from snapshot", recovery.restored);
    }
    let seeded = small.seed_missing();
    if !seeded.is_empty() {
        debug!("Starting empty: {:?}", seeded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HostStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_new_store() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let store = Store::open_with_config(config.clone()).unwrap();

        assert!(config.small_store_path().exists());
        assert!(config.blob_store_path().exists());
        assert!(store.verify_integrity().await.is_intact());
        assert!(!store.coordinator().has_remote());
        assert!(store.start_background_probe().is_none());
    }

    #[tokio::test]
    async fn test_open_loads_existing_store() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        {
            let store = Store::open_with_config(config.clone()).unwrap();
            let outcome = store
                .coordinator()
                .write(Collection::Drivers, &[json!({"id": "d1"})])
                .await;
            assert!(outcome.is_persisted());
        }

        let store = Store::open_with_config(config).unwrap();
        let drivers = store.coordinator().read(Collection::Drivers).await;
        assert_eq!(drivers, vec![json!({"id": "d1"})]);
    }

    #[tokio::test]
    async fn test_open_repairs_missing_collection() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        drop(Store::open_with_config(config.clone()).unwrap());

        {
            let mut host = SqliteHostStore::open(&config.small_store_path(), u64::MAX).unwrap();
            host.delete("bales").unwrap();
        }

        let store = Store::open_with_config(config).unwrap();
        assert!(store.verify_integrity().await.is_intact());
        assert!(store.coordinator().read(Collection::Bales).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_entity_cascades_to_blobs() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).unwrap();
        let _ = store
            .coordinator()
            .write(Collection::Bins, &[json!({"id": "b1"}), json!({"id": "b2"})])
            .await;
        store
            .attachments()
            .attach(Collection::Bins, "b1", "photos", vec![1, 2, 3])
            .await
            .unwrap();

        let removal = store.delete_entity(Collection::Bins, "b1").await.unwrap();

        assert_eq!(
            removal,
            EntityRemoval {
                existed: true,
                blobs_removed: 1
            }
        );
        assert_eq!(store.usage().await.blob_store_bytes, 0);
        assert_eq!(
            store.coordinator().read(Collection::Bins).await,
            vec![json!({"id": "b2"})]
        );
    }

    #[tokio::test]
    async fn test_repair_attachments_reports_changed_entities() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).unwrap();
        let _ = store
            .coordinator()
            .write(
                Collection::Bales,
                &[json!({"id": "x", "photos": ["gone"]}), json!({"id": "y"})],
            )
            .await;

        let repaired = store
            .repair_attachments(Collection::Bales, "photos")
            .await
            .unwrap();

        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].0, "x");
        assert_eq!(repaired[0].1.dropped, vec!["gone".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_all_then_recover() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).unwrap();
        let _ = store
            .coordinator()
            .write(Collection::Containers, &[json!({"id": "c1"})])
            .await;

        store.clear_all().await.unwrap();
        assert!(!store.verify_integrity().await.is_intact());

        let report = store.recover().await;
        assert!(report.recovered_any());
        assert_eq!(
            store.coordinator().read(Collection::Containers).await,
            vec![json!({"id": "c1"})]
        );
    }

    #[tokio::test]
    async fn test_export_and_usage() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(test_config(&temp_dir)).unwrap();
        let _ = store
            .coordinator()
            .write(Collection::PickupRequests, &[json!({"id": "pr-1"})])
            .await;

        let export = store.export().await;

        assert_eq!(export.collections.len(), Collection::ALL.len());
        assert_eq!(export.collections["pickup_requests"], vec![json!({"id": "pr-1"})]);
        assert!(export.usage.small_store_bytes > 0);
        assert_eq!(
            export.usage.small_store_capacity,
            store.config().small_store_quota_bytes
        );

        let json = serde_json::to_value(&export).unwrap();
        assert!(json.get("exportedAt").is_some());
    }
}
