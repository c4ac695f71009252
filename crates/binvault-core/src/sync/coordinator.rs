//! Hybrid sync coordinator
//!
//! One façade per process for collection reads and writes. Reads go to the
//! remote first while it is believed reachable and fall back to the small
//! store cache on any failure. Writes always land locally first and are then
//! pushed to the remote; a failed push never rolls back the local write.
//!
//! Reachability is tracked as a [`SyncMode`] owned by the coordinator and
//! published on a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::mode::SyncMode;
use super::outbox::{DrainReport, Outbox, RetryPolicy};
use crate::attachments::entity_id_of;
use crate::records::Collection;
use crate::remote::{RemoteError, RemoteResult, RemoteService, SyncBatch};
use crate::storage::{SharedSmallStore, StorageError, StorageResult, WriteOutcome};

/// Coordinator settings
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    /// Queue failed remote writes for later replay
    pub outbox_enabled: bool,
    pub retry: RetryPolicy,
}

/// What a reconnect achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectReport {
    pub mode: SyncMode,
    /// Records pushed by the full sync, if it ran and succeeded
    pub synced: Option<usize>,
    pub drained: Option<DrainReport>,
}

/// Remote-first collection access with cache fallback
#[derive(Clone)]
pub struct HybridSyncCoordinator {
    small: SharedSmallStore,
    remote: Option<Arc<dyn RemoteService>>,
    outbox: Option<Outbox>,
    mode: Arc<watch::Sender<SyncMode>>,
}

impl HybridSyncCoordinator {
    /// Without a remote the coordinator stays [`SyncMode::LocalOnly`]
    pub fn new(
        small: SharedSmallStore,
        remote: Option<Arc<dyn RemoteService>>,
        options: CoordinatorOptions,
    ) -> Self {
        let initial = if remote.is_some() {
            SyncMode::RemotePreferred
        } else {
            SyncMode::LocalOnly
        };
        let (mode, _) = watch::channel(initial);
        let outbox = options
            .outbox_enabled
            .then(|| Outbox::new(small.clone(), options.retry.clone()));

        Self {
            small,
            remote,
            outbox,
            mode: Arc::new(mode),
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        self.outbox.as_ref()
    }

    pub fn small_store(&self) -> &SharedSmallStore {
        &self.small
    }

    // ==================== Mode ====================

    pub fn mode(&self) -> SyncMode {
        *self.mode.borrow()
    }

    /// Watch mode changes
    pub fn subscribe_mode(&self) -> watch::Receiver<SyncMode> {
        self.mode.subscribe()
    }

    /// Force a mode; `RemotePreferred` is ignored without a remote
    pub fn set_mode(&self, mode: SyncMode) {
        if mode.is_remote_preferred() && self.remote.is_none() {
            warn!("No remote configured, staying in {}", SyncMode::LocalOnly);
            return;
        }
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            info!("Sync mode changed: {} -> {}", previous, mode);
        }
    }

    fn mark_unreachable(&self, context: &str, error: &RemoteError) {
        warn!("Remote {} failed, falling back to local cache: {}", context, error);
        self.set_mode(SyncMode::LocalOnly);
    }

    /// Check remote health and update the mode
    pub async fn probe(&self) -> SyncMode {
        let Some(remote) = &self.remote else {
            return SyncMode::LocalOnly;
        };

        match remote.health().await {
            Ok(()) => self.set_mode(SyncMode::RemotePreferred),
            Err(e) => self.mark_unreachable("health check", &e),
        }
        self.mode()
    }

    /// The remote, if it should be used right now
    fn active_remote(&self) -> Option<&Arc<dyn RemoteService>> {
        self.remote
            .as_ref()
            .filter(|_| self.mode().is_remote_preferred())
    }

    // ==================== Collections ====================

    /// Read a collection, remote first when reachable
    ///
    /// A collection with unsynced local changes is served from the cache so
    /// the remote copy cannot overwrite them.
    pub async fn read(&self, collection: Collection) -> Vec<Value> {
        if let Some(remote) = self.active_remote() {
            if self.has_unsynced(collection).await {
                debug!("{} has unsynced changes, reading local cache", collection);
            } else {
                match remote.list(collection).await {
                    Ok(records) => {
                        let outcome =
                            self.small.lock().await.set_collection(collection, &records);
                        if !outcome.is_persisted() {
                            warn!("Could not refresh cached {}: {:?}", collection, outcome);
                        }
                        self.set_mode(SyncMode::RemotePreferred);
                        return records;
                    }
                    Err(e) => self.mark_unreachable(&format!("read of {}", collection), &e),
                }
            }
        }

        self.small.lock().await.get_collection(collection)
    }

    /// Replace a collection locally, then push it to the remote
    pub async fn write(&self, collection: Collection, records: &[Value]) -> WriteOutcome {
        let outcome = self.small.lock().await.set_collection(collection, records);

        let Some(remote) = self.active_remote() else {
            self.queue(collection).await;
            return outcome;
        };
        let batch: SyncBatch = [(collection.key().to_string(), records.to_vec())].into();
        if let Err(e) = remote.sync(&batch).await {
            self.mark_unreachable(&format!("write to {}", collection), &e);
            self.queue(collection).await;
        }
        outcome
    }

    /// Append an entity locally, then create it remotely
    ///
    /// Entities without an `id` get a provisional one. When the remote
    /// answers with the created entity it replaces the provisional copy.
    /// The outcome is that of the last local write.
    pub async fn create(
        &self,
        collection: Collection,
        entity: Value,
    ) -> StorageResult<(Value, WriteOutcome)> {
        let Value::Object(mut fields) = entity else {
            return Err(not_an_object(collection));
        };
        if !fields.contains_key("id") {
            fields.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        let entity = Value::Object(fields);
        let provisional_id = entity_id_of(&entity).unwrap_or_default();

        let outcome = {
            let mut small = self.small.lock().await;
            let mut records = small.get_collection(collection);
            records.push(entity.clone());
            logged(collection, small.set_collection(collection, &records))
        };

        let Some(remote) = self.active_remote() else {
            self.queue(collection).await;
            return Ok((entity, outcome));
        };

        match remote.create(collection, &entity).await {
            Ok(created @ Value::Object(_)) => {
                let outcome = self
                    .replace_cached(collection, &provisional_id, &created)
                    .await;
                debug!(
                    "Created {} entity, provisional id {} -> {:?}",
                    collection,
                    provisional_id,
                    entity_id_of(&created)
                );
                Ok((created, outcome))
            }
            Ok(_) => Ok((entity, outcome)),
            Err(e) => {
                self.mark_unreachable(&format!("create in {}", collection), &e);
                self.queue(collection).await;
                Ok((entity, outcome))
            }
        }
    }

    /// Merge `patch` into a cached entity, then update it remotely
    ///
    /// The outcome is that of the last local write.
    pub async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: &Value,
    ) -> StorageResult<(Value, WriteOutcome)> {
        let Value::Object(changes) = patch else {
            return Err(not_an_object(collection));
        };

        let (merged, outcome) = {
            let mut small = self.small.lock().await;
            let mut records = small.get_collection(collection);
            let slot = records
                .iter_mut()
                .find(|r| entity_id_of(r).as_deref() == Some(id))
                .ok_or_else(|| StorageError::EntityNotFound {
                    collection: collection.to_string(),
                    entity_id: id.to_string(),
                })?;
            merge_fields(slot, changes);
            let merged = slot.clone();
            let outcome = logged(collection, small.set_collection(collection, &records));
            (merged, outcome)
        };

        let Some(remote) = self.active_remote() else {
            self.queue(collection).await;
            return Ok((merged, outcome));
        };

        match remote.update(collection, id, patch).await {
            Ok(updated @ Value::Object(_)) => {
                let outcome = self.replace_cached(collection, id, &updated).await;
                Ok((updated, outcome))
            }
            Ok(_) => Ok((merged, outcome)),
            Err(e) => {
                self.mark_unreachable(&format!("update of {}/{}", collection, id), &e);
                self.queue(collection).await;
                Ok((merged, outcome))
            }
        }
    }

    /// Remove an entity locally, then delete it remotely
    ///
    /// Returns whether the entity was in the cache.
    pub async fn delete(&self, collection: Collection, id: &str) -> bool {
        let existed = {
            let mut small = self.small.lock().await;
            let mut records = small.get_collection(collection);
            let before = records.len();
            records.retain(|r| entity_id_of(r).as_deref() != Some(id));
            let existed = records.len() != before;
            if existed {
                let _ = logged(collection, small.set_collection(collection, &records));
            }
            existed
        };

        let Some(remote) = self.active_remote() else {
            self.queue(collection).await;
            return existed;
        };
        if let Err(e) = remote.delete(collection, id).await {
            self.mark_unreachable(&format!("delete of {}/{}", collection, id), &e);
            self.queue(collection).await;
        }
        existed
    }

    // ==================== Sync ====================

    /// Push every cached collection to the remote in one batch
    pub async fn sync_local_to_remote(&self) -> RemoteResult<usize> {
        let remote = self.remote.as_ref().ok_or(RemoteError::NotConfigured)?;

        let batch: SyncBatch = {
            let small = self.small.lock().await;
            Collection::ALL
                .into_iter()
                .map(|c| (c.key().to_string(), small.get_collection(c)))
                .collect()
        };
        let total: usize = batch.values().map(Vec::len).sum();

        match remote.sync(&batch).await {
            Ok(()) => {
                self.set_mode(SyncMode::RemotePreferred);
                info!("Synced {} local record(s) to remote", total);
                Ok(total)
            }
            Err(e) => {
                self.mark_unreachable("full sync", &e);
                Err(e)
            }
        }
    }

    /// Probe, and when the remote is back push local state
    ///
    /// The full sync covers every outbox entry queued before it read the
    /// cache; those are acknowledged and anything queued later is drained.
    pub async fn reconnect(&self) -> ReconnectReport {
        let mode = self.probe().await;
        let mut report = ReconnectReport {
            mode,
            synced: None,
            drained: None,
        };
        if !mode.is_remote_preferred() {
            return report;
        }

        let covered = match &self.outbox {
            Some(outbox) => outbox.entries().await,
            None => Vec::new(),
        };
        match self.sync_local_to_remote().await {
            Ok(total) => report.synced = Some(total),
            Err(e) => {
                warn!("Sync after reconnect failed: {}", e);
                report.mode = self.mode();
                return report;
            }
        }

        if let (Some(outbox), Some(remote)) = (&self.outbox, &self.remote) {
            let acknowledged = outbox.acknowledge(&covered).await;
            let drained = outbox.drain(remote.as_ref()).await;
            report.drained = Some(DrainReport {
                sent: acknowledged + drained.sent,
                remaining: outbox.len().await,
            });
        }
        report.mode = self.mode();
        report
    }

    /// Probe periodically, reconnecting whenever the remote comes back
    pub fn spawn_probe_task(&self, interval: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if coordinator.mode().is_remote_preferred() {
                    coordinator.probe().await;
                } else {
                    let report = coordinator.reconnect().await;
                    debug!("Background reconnect: {:?}", report);
                }
            }
        })
    }

    async fn has_unsynced(&self, collection: Collection) -> bool {
        match &self.outbox {
            Some(outbox) => outbox.is_pending(collection).await,
            None => false,
        }
    }

    /// Swap the cached entity `id` for `entity`
    async fn replace_cached(
        &self,
        collection: Collection,
        id: &str,
        entity: &Value,
    ) -> WriteOutcome {
        let mut small = self.small.lock().await;
        let mut records = small.get_collection(collection);
        if let Some(slot) = records
            .iter_mut()
            .find(|r| entity_id_of(r).as_deref() == Some(id))
        {
            *slot = entity.clone();
        }
        logged(collection, small.set_collection(collection, &records))
    }

    /// Mark `collection` unsynced when the outbox is on and a remote exists
    async fn queue(&self, collection: Collection) {
        if self.remote.is_none() {
            return;
        }
        if let Some(outbox) = &self.outbox {
            let outcome = outbox.enqueue(collection).await;
            if !outcome.is_persisted() {
                warn!(
                    "Changes to {} will not be replayed automatically; run a full sync",
                    collection
                );
            }
        }
    }
}

fn merge_fields(target: &mut Value, changes: &Map<String, Value>) {
    if let Value::Object(fields) = target {
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
    }
}

fn not_an_object(collection: Collection) -> StorageError {
    StorageError::CorruptRecord {
        key: collection.key().to_string(),
        details: "entities must be JSON objects".to_string(),
    }
}

fn logged(collection: Collection, outcome: WriteOutcome) -> WriteOutcome {
    if !outcome.is_persisted() {
        warn!("Cached {} not persisted: {:?}", collection, outcome);
    }
    outcome
}
