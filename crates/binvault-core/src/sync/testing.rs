//! In-memory remote for sync tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::records::Collection;
use crate::remote::{RemoteError, RemoteResult, RemoteService, SyncBatch};

/// Remote whose availability can be toggled; records every call
#[derive(Default)]
pub struct FakeRemote {
    pub collections: Mutex<BTreeMap<Collection, Vec<Value>>>,
    pub calls: Mutex<Vec<String>>,
    pub down: AtomicBool,
    /// Fail this many calls before succeeding again
    pub fail_next: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeRemote {
    pub fn with(collection: Collection, records: Vec<Value>) -> Self {
        let remote = Self::default();
        remote
            .collections
            .lock()
            .unwrap()
            .insert(collection, records);
        remote
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    fn call(&self, name: String) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(name);
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(RemoteError::Status(503));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn list(&self, collection: Collection) -> RemoteResult<Vec<Value>> {
        self.call(format!("list {}", collection))?;
        Ok(self.records(collection))
    }

    async fn create(&self, collection: Collection, entity: &Value) -> RemoteResult<Value> {
        self.call(format!("create {}", collection))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = entity.clone();
        created["id"] = Value::String(format!("srv-{}", n));
        self.collections
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: &Value,
    ) -> RemoteResult<Value> {
        self.call(format!("update {} {}", collection, id))?;
        let mut updated = patch.clone();
        updated["id"] = Value::String(id.to_string());
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        self.call(format!("delete {} {}", collection, id))
    }

    async fn sync(&self, batch: &SyncBatch) -> RemoteResult<()> {
        let keys: Vec<&str> = batch.keys().map(String::as_str).collect();
        self.call(format!("sync {}", keys.join(",")))?;
        let mut collections = self.collections.lock().unwrap();
        for (key, records) in batch {
            if let Ok(collection) = key.parse::<Collection>() {
                collections.insert(collection, records.clone());
            }
        }
        Ok(())
    }

    async fn health(&self) -> RemoteResult<()> {
        self.call("health".to_string())
    }
}
