//! Storage layer
//!
//! Two tiers of local storage:
//!
//! - **Small store**: string records (one JSON array per collection) over a
//!   quota-constrained synchronous host. Protected keys are snapshotted,
//!   verified and never evicted.
//! - **Blob store**: binary attachments in a larger asynchronous store,
//!   referenced from entity records by id.

pub mod backup;
pub mod blob;
pub mod error;
pub mod eviction;
pub mod host;
pub mod small_store;

pub use backup::{BackupRecoveryManager, IntegrityReport, RecoveryReport, Snapshot};
pub use blob::{BlobRecord, BlobStore};
pub use error::{StorageError, StorageResult};
pub use eviction::QuotaEvictionPolicy;
pub use host::{HostStore, MemoryHostStore, SqliteHostStore};
pub use small_store::{SharedSmallStore, SmallStore, WriteOutcome};
