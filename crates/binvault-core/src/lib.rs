//! binvault core library
//!
//! This crate provides the durable local state layer for binvault, the
//! donation-logistics admin tool: bins, drivers, containers, bales and
//! pickup requests cached locally and synced with a remote service.
//!
//! # Architecture
//!
//! - **Small store**: quota-limited key/value cache, one JSON array per
//!   collection; protected collections are snapshotted and never evicted
//! - **Blob store**: photos and documents, owned by entities
//! - **Sync coordinator**: remote first with cache fallback
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//!
//! let bins = store.coordinator().read(Collection::Bins).await;
//! store.coordinator().create(Collection::Bins, json!({"zone": 3})).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Unified storage interface (main entry point)
//! - `records`: Record registry and collections
//! - `storage`: Small store, backup, eviction and blob store
//! - `attachments`: Entity/blob linking and repair
//! - `remote`: Remote service client
//! - `sync`: Hybrid sync coordinator and outbox
//! - `usage`: Storage usage reporting
//! - `config`: Application configuration

pub mod attachments;
pub mod config;
pub mod records;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;
pub mod usage;

pub use attachments::{AttachmentLinker, Reconciliation};
pub use config::Config;
pub use records::{Collection, RecordDescriptor, RecordKind, RecordRegistry};
pub use remote::{HttpRemote, RemoteError, RemoteService};
pub use storage::{
    BlobRecord, BlobStore, SharedSmallStore, SmallStore, StorageError, StorageResult,
    WriteOutcome,
};
pub use store::{EntityRemoval, Export, Store};
pub use sync::{HybridSyncCoordinator, SyncMode};
pub use usage::{format_bytes, StorageUsage, StorageUsageReporter};
