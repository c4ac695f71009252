//! Hybrid local/remote sync
//!
//! The [`HybridSyncCoordinator`] serves collection reads remote first with a
//! cache fallback and writes local first with a best-effort remote push.
//! A collection whose push failed can optionally be marked in a durable
//! [`Outbox`]; its cached copy is replayed with exponential backoff once the
//! remote is reachable again.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = HybridSyncCoordinator::new(small, Some(remote), options);
//! let bins = coordinator.read(Collection::Bins).await;
//! ```

mod coordinator;
mod mode;
mod outbox;
#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CoordinatorOptions, HybridSyncCoordinator, ReconnectReport};
pub use mode::SyncMode;
pub use outbox::{DrainReport, Outbox, OutboxEntry, RetryPolicy};
