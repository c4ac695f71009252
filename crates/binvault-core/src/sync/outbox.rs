//! Durable outbox of unsynced collections
//!
//! When enabled, a collection whose remote write failed is marked under the
//! protected `sync_outbox` key. The marker holds no records: replay always
//! sends the collection as it is cached at that moment, so a replay can never
//! push stale data or create an entity twice, and the queue never holds more
//! than one entry per collection.
//!
//! Each replay retries with exponential backoff. The first entry that still
//! fails stops the drain so later entries never overtake it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::records::{Collection, OUTBOX_KEY};
use crate::remote::{RemoteService, SyncBatch};
use crate::storage::{SharedSmallStore, SmallStore, WriteOutcome};

/// A collection with local changes the remote has not seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Changes on every re-mark, so a replay only clears what it covered
    pub id: String,
    pub collection: Collection,
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub attempts: u32,
}

/// Backoff settings for replay
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after `delay`, doubling up to the maximum
    pub fn next_delay(&self, delay: Duration) -> Duration {
        (delay * 2).min(self.max_delay)
    }
}

/// Result of one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: usize,
    pub remaining: usize,
}

/// Unsynced collection markers kept in the small store
#[derive(Clone)]
pub struct Outbox {
    small: SharedSmallStore,
    retry: RetryPolicy,
}

impl Outbox {
    pub fn new(small: SharedSmallStore, retry: RetryPolicy) -> Self {
        Self { small, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Queued entries, oldest first
    pub async fn entries(&self) -> Vec<OutboxEntry> {
        read_entries(&*self.small.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.entries().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `collection` has changes waiting for the remote
    pub async fn is_pending(&self, collection: Collection) -> bool {
        self.entries()
            .await
            .iter()
            .any(|entry| entry.collection == collection)
    }

    /// Mark `collection` as unsynced, replacing any older mark for it
    pub async fn enqueue(&self, collection: Collection) -> WriteOutcome {
        let mut small = self.small.lock().await;
        let mut entries = read_entries(&small);
        entries.retain(|entry| entry.collection != collection);

        debug!("Queued {} for replay", collection);
        entries.push(OutboxEntry {
            id: Uuid::new_v4().to_string(),
            collection,
            enqueued_at: Utc::now(),
            attempts: 0,
        });

        let outcome = small.set_json(OUTBOX_KEY, &entries);
        if !outcome.is_persisted() {
            warn!("Outbox could not be persisted: {:?}", outcome);
        }
        outcome
    }

    /// Drop the given entries, e.g. after a full sync delivered them
    ///
    /// Entries re-marked since `covered` was read have a new id and stay.
    pub async fn acknowledge(&self, covered: &[OutboxEntry]) -> usize {
        if covered.is_empty() {
            return 0;
        }
        let mut small = self.small.lock().await;
        let mut entries = read_entries(&small);
        let before = entries.len();
        entries.retain(|entry| !covered.iter().any(|done| done.id == entry.id));
        let removed = before - entries.len();

        if removed > 0 {
            let outcome = small.set_json(OUTBOX_KEY, &entries);
            if !outcome.is_persisted() {
                warn!("Outbox could not be persisted: {:?}", outcome);
            }
        }
        removed
    }

    /// Replay queued collections in order until one still fails
    pub async fn drain(&self, remote: &dyn RemoteService) -> DrainReport {
        let mut report = DrainReport::default();
        let mut replayed = Vec::new();

        loop {
            let Some(entry) = self.entries().await.into_iter().next() else {
                break;
            };

            let mut delay = self.retry.initial_delay;
            let mut failures = 0;
            let delivered = loop {
                // Current cached copy, re-read so a retry never sends stale records
                let batch: SyncBatch = {
                    let small = self.small.lock().await;
                    let records = small.get_collection(entry.collection);
                    [(entry.collection.key().to_string(), records)].into()
                };
                match remote.sync(&batch).await {
                    Ok(()) => break true,
                    Err(e) => {
                        failures += 1;
                        warn!(
                            "Outbox replay of {} failed (attempt {}/{}): {}",
                            entry.collection, failures, self.retry.max_attempts, e
                        );
                        if failures >= self.retry.max_attempts {
                            break false;
                        }
                        tokio::time::sleep(delay).await;
                        delay = self.retry.next_delay(delay);
                    }
                }
            };

            let mut small = self.small.lock().await;
            let mut entries = read_entries(&small);
            if delivered {
                entries.retain(|queued| queued.id != entry.id);
                report.sent += 1;
            } else if let Some(queued) = entries.iter_mut().find(|queued| queued.id == entry.id) {
                queued.attempts += failures;
            }
            report.remaining = entries.len();

            let outcome = small.set_json(OUTBOX_KEY, &entries);
            if !outcome.is_persisted() {
                // The delivered entry is still queued; replaying it again would loop
                warn!("Outbox could not be persisted after replay: {:?}", outcome);
                break;
            }
            if !delivered {
                break;
            }
            // A collection re-marked during the replay waits for the next drain
            replayed.push(entry.collection);
            if entries
                .first()
                .is_some_and(|next| replayed.contains(&next.collection))
            {
                break;
            }
        }

        if report.sent > 0 {
            info!(
                "Outbox replayed {} collection(s), {} remaining",
                report.sent, report.remaining
            );
        }
        report
    }

    /// Drop every queued entry
    pub async fn clear(&self) {
        self.small.lock().await.remove(OUTBOX_KEY);
    }
}

fn read_entries(small: &SmallStore) -> Vec<OutboxEntry> {
    small.get_json(OUTBOX_KEY).unwrap_or_default()
}
