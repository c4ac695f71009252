//! Attachment linking
//!
//! Blobs are owned by `(entity id, entity type)` in the blob store. The
//! owning entity record mirrors that ownership as an array of blob ids under
//! a caller-chosen field (for example `photos`). The two stores are not
//! updated atomically, so the mirror can drift; [`AttachmentLinker::reconcile`]
//! rebuilds it from the blob store, which is authoritative.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::records::Collection;
use crate::storage::{BlobStore, SharedSmallStore, StorageError, StorageResult};

/// Result of rebuilding an entity's id list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The id list now stored on the entity
    pub ids: Vec<String>,
    /// Stored ids with no matching blob
    pub dropped: Vec<String>,
    /// Blob ids that were missing from the stored list
    pub adopted: Vec<String>,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        !self.dropped.is_empty() || !self.adopted.is_empty()
    }
}

/// Keeps entity records and their blobs in step
#[derive(Clone)]
pub struct AttachmentLinker {
    small: SharedSmallStore,
    blobs: BlobStore,
}

impl AttachmentLinker {
    pub fn new(small: SharedSmallStore, blobs: BlobStore) -> Self {
        Self { small, blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Store `data` for an entity and append the new id to `field`
    pub async fn attach(
        &self,
        collection: Collection,
        entity_id: &str,
        field: &str,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let blob_id = self
            .blobs
            .put(entity_id, collection.entity_type(), data)
            .await?;

        let linked = {
            let mut small = self.small.lock().await;
            let mut records = small.get_collection(collection);
            match find_entity(&mut records, entity_id) {
                Some(entity) => {
                    let mut ids = id_list(entity, field);
                    ids.push(blob_id.clone());
                    set_id_list(entity, field, &ids);

                    let outcome = small.set_collection(collection, &records);
                    if !outcome.is_persisted() {
                        warn!(
                            "Blob {} stored but {} '{}' was not updated: {:?}",
                            blob_id, collection, entity_id, outcome
                        );
                    }
                    true
                }
                None => false,
            }
        };

        if !linked {
            self.blobs.delete(&blob_id).await?;
            return Err(StorageError::EntityNotFound {
                collection: collection.to_string(),
                entity_id: entity_id.to_string(),
            });
        }

        debug!("Attached blob {} to {} '{}'", blob_id, collection, entity_id);
        Ok(blob_id)
    }

    /// Delete a blob and drop its id from `field`; `false` if it did not exist
    pub async fn detach(
        &self,
        collection: Collection,
        entity_id: &str,
        field: &str,
        blob_id: &str,
    ) -> StorageResult<bool> {
        let existed = self.blobs.delete(blob_id).await?;

        let mut small = self.small.lock().await;
        let mut records = small.get_collection(collection);
        if let Some(entity) = find_entity(&mut records, entity_id) {
            let mut ids = id_list(entity, field);
            let before = ids.len();
            ids.retain(|id| id != blob_id);
            if ids.len() != before {
                set_id_list(entity, field, &ids);
                let outcome = small.set_collection(collection, &records);
                if !outcome.is_persisted() {
                    warn!(
                        "Blob {} deleted but {} '{}' still lists it: {:?}",
                        blob_id, collection, entity_id, outcome
                    );
                }
            }
        }

        Ok(existed)
    }

    /// `(id, data)` of every blob owned by an entity
    pub async fn list(
        &self,
        collection: Collection,
        entity_id: &str,
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.blobs
            .get_all_with_ids(entity_id, collection.entity_type())
            .await
    }

    /// Delete every blob owned by an entity that is being removed
    pub async fn remove_entity(
        &self,
        collection: Collection,
        entity_id: &str,
    ) -> StorageResult<usize> {
        self.blobs
            .delete_all_for_entity(entity_id, collection.entity_type())
            .await
    }

    /// Whether the stored id list matches the blob store exactly
    pub async fn verify(
        &self,
        collection: Collection,
        entity_id: &str,
        field: &str,
    ) -> StorageResult<bool> {
        let real = self
            .blobs
            .ids_for_entity(entity_id, collection.entity_type())
            .await?;
        let stored = {
            let small = self.small.lock().await;
            let mut records = small.get_collection(collection);
            find_entity(&mut records, entity_id)
                .map(|entity| id_list(entity, field))
                .unwrap_or_default()
        };

        let real_set: BTreeSet<&String> = real.iter().collect();
        let stored_set: BTreeSet<&String> = stored.iter().collect();
        Ok(stored.len() == real.len() && stored_set == real_set)
    }

    /// Rebuild `field` from the blob ids that actually exist
    ///
    /// Stored ids with a blob keep their order, dangling ids are dropped and
    /// unlisted blobs are appended in insertion order.
    pub async fn reconcile(
        &self,
        collection: Collection,
        entity_id: &str,
        field: &str,
    ) -> StorageResult<Reconciliation> {
        let real = self
            .blobs
            .ids_for_entity(entity_id, collection.entity_type())
            .await?;
        let real_set: BTreeSet<&str> = real.iter().map(String::as_str).collect();

        let mut small = self.small.lock().await;
        let mut records = small.get_collection(collection);
        let entity =
            find_entity(&mut records, entity_id).ok_or_else(|| StorageError::EntityNotFound {
                collection: collection.to_string(),
                entity_id: entity_id.to_string(),
            })?;

        let stored = id_list(entity, field);
        let mut result = Reconciliation::default();
        let mut seen = BTreeSet::new();
        for id in stored.iter() {
            if !real_set.contains(id.as_str()) {
                result.dropped.push(id.clone());
            } else if seen.insert(id.clone()) {
                result.ids.push(id.clone());
            }
        }
        for id in &real {
            if seen.insert(id.clone()) {
                result.adopted.push(id.clone());
                result.ids.push(id.clone());
            }
        }

        if result.ids != stored {
            set_id_list(entity, field, &result.ids);
            let outcome = small.set_collection(collection, &records);
            if outcome.is_persisted() {
                info!(
                    "Reconciled {} '{}' {}: dropped {:?}, adopted {:?}",
                    collection, entity_id, field, result.dropped, result.adopted
                );
            } else {
                warn!(
                    "Reconciled {} '{}' {} but could not persist: {:?}",
                    collection, entity_id, field, outcome
                );
            }
        }

        Ok(result)
    }
}

/// The `id` of an entity as a string, whether stored as text or number
pub fn entity_id_of(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn find_entity<'a>(records: &'a mut [Value], entity_id: &str) -> Option<&'a mut Value> {
    records
        .iter_mut()
        .find(|record| entity_id_of(record).as_deref() == Some(entity_id))
}

fn id_list(entity: &Value, field: &str) -> Vec<String> {
    entity
        .get(field)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn set_id_list(entity: &mut Value, field: &str, ids: &[String]) {
    if let Value::Object(map) = entity {
        map.insert(
            field.to_string(),
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        );
    }
}
