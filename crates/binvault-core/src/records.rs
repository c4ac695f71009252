//! Typed record descriptors
//!
//! Every key the small store knows about is described once here: its shape,
//! whether eviction may touch it, and whether its absence is an integrity
//! fault. The eviction policy and the backup manager derive their key sets
//! from a [`RecordRegistry`] instead of keeping their own lists.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Business collections cached in the small store, one JSON array each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Drivers,
    Bins,
    Containers,
    Bales,
    PickupRequests,
}

impl Collection {
    /// All collections, in the order they are synced
    pub const ALL: [Collection; 5] = [
        Collection::Drivers,
        Collection::Bins,
        Collection::Containers,
        Collection::Bales,
        Collection::PickupRequests,
    ];

    /// Small store key holding this collection
    pub fn key(self) -> &'static str {
        match self {
            Collection::Drivers => "drivers",
            Collection::Bins => "bins",
            Collection::Containers => "containers",
            Collection::Bales => "bales",
            Collection::PickupRequests => "pickup_requests",
        }
    }

    /// Path segment on the remote service
    pub fn remote_path(self) -> &'static str {
        match self {
            Collection::Drivers => "drivers",
            Collection::Bins => "bins",
            Collection::Containers => "containers",
            Collection::Bales => "bales",
            Collection::PickupRequests => "pickup-requests",
        }
    }

    /// Owner type recorded on blobs attached to entities of this collection
    pub fn entity_type(self) -> &'static str {
        match self {
            Collection::Drivers => "driver",
            Collection::Bins => "bin",
            Collection::Containers => "container",
            Collection::Bales => "bale",
            Collection::PickupRequests => "pickup_request",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Collection {
    type Err = String;

    /// Accepts the cache key, the remote path or the entity type
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Collection::ALL
            .into_iter()
            .find(|c| {
                c.key() == needle || c.remote_path() == needle || c.entity_type() == needle
            })
            .ok_or_else(|| {
                format!(
                    "Unknown collection '{}'. Valid: drivers, bins, containers, bales, pickup_requests",
                    s
                )
            })
    }
}

/// What a key holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// JSON array of entities
    Collection(Collection),
    /// Marker written by the authentication layer
    AuthMarker,
    /// Per-feature preference (e.g. default assignee)
    Preference,
    /// Queue of remote writes awaiting delivery
    Outbox,
}

/// One entry of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub key: &'static str,
    pub kind: RecordKind,
    /// Never removed by eviction; captured in snapshots
    pub protected: bool,
    /// Absence after a write or at startup is an integrity fault
    pub integrity_checked: bool,
}

impl RecordDescriptor {
    const fn collection(collection: Collection, key: &'static str) -> Self {
        Self {
            key,
            kind: RecordKind::Collection(collection),
            protected: true,
            integrity_checked: true,
        }
    }
}

pub const AUTH_MARKER_KEY: &str = "auth_session";
pub const OUTBOX_KEY: &str = "sync_outbox";
pub const DEFAULT_ASSIGNEE_KEY: &str = "pref_default_assignee";

const STANDARD: &[RecordDescriptor] = &[
    RecordDescriptor::collection(Collection::Drivers, "drivers"),
    RecordDescriptor::collection(Collection::Bins, "bins"),
    RecordDescriptor::collection(Collection::Containers, "containers"),
    RecordDescriptor::collection(Collection::Bales, "bales"),
    RecordDescriptor::collection(Collection::PickupRequests, "pickup_requests"),
    RecordDescriptor {
        key: AUTH_MARKER_KEY,
        kind: RecordKind::AuthMarker,
        protected: true,
        integrity_checked: false,
    },
    RecordDescriptor {
        key: OUTBOX_KEY,
        kind: RecordKind::Outbox,
        protected: true,
        integrity_checked: false,
    },
    RecordDescriptor {
        key: DEFAULT_ASSIGNEE_KEY,
        kind: RecordKind::Preference,
        protected: false,
        integrity_checked: false,
    },
];

/// Source of truth for known keys
#[derive(Debug, Clone)]
pub struct RecordRegistry {
    descriptors: Vec<RecordDescriptor>,
}

impl Default for RecordRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl RecordRegistry {
    /// The registry used by the application
    pub fn standard() -> Self {
        Self {
            descriptors: STANDARD.to_vec(),
        }
    }

    /// Build a registry from explicit descriptors
    pub fn from_descriptors(descriptors: Vec<RecordDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn descriptors(&self) -> &[RecordDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, key: &str) -> Option<&RecordDescriptor> {
        self.descriptors.iter().find(|d| d.key == key)
    }

    pub fn is_protected(&self, key: &str) -> bool {
        self.get(key).is_some_and(|d| d.protected)
    }

    /// Keys eviction must never remove
    pub fn protected_keys(&self) -> BTreeSet<String> {
        self.descriptors
            .iter()
            .filter(|d| d.protected)
            .map(|d| d.key.to_string())
            .collect()
    }

    pub fn is_integrity_checked(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|d| d.protected && d.integrity_checked)
    }

    /// Keys whose absence is an integrity fault
    pub fn integrity_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors
            .iter()
            .filter(|d| d.protected && d.integrity_checked)
            .map(|d| d.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_collection_is_registered_and_protected() {
        let registry = RecordRegistry::standard();
        for collection in Collection::ALL {
            let desc = registry.get(collection.key()).unwrap();
            assert_eq!(desc.kind, RecordKind::Collection(collection));
            assert!(desc.protected);
            assert!(desc.integrity_checked);
        }
    }

    #[test]
    fn test_auth_marker_is_protected_but_not_integrity_checked() {
        let registry = RecordRegistry::standard();
        assert!(registry.is_protected(AUTH_MARKER_KEY));
        assert!(!registry.integrity_keys().any(|k| k == AUTH_MARKER_KEY));
        assert!(!registry.is_integrity_checked(AUTH_MARKER_KEY));
        assert!(registry.is_integrity_checked("bins"));
    }

    #[test]
    fn test_preferences_are_evictable() {
        let registry = RecordRegistry::standard();
        assert!(!registry.is_protected(DEFAULT_ASSIGNEE_KEY));
        assert!(!registry.is_protected("_tmp_cache"));
        assert!(!registry.protected_keys().contains(DEFAULT_ASSIGNEE_KEY));
    }

    #[test]
    fn test_collection_parsing() {
        assert_eq!("bins".parse::<Collection>().unwrap(), Collection::Bins);
        assert_eq!(
            "pickup-requests".parse::<Collection>().unwrap(),
            Collection::PickupRequests
        );
        assert_eq!("Bale".parse::<Collection>().unwrap(), Collection::Bales);
        assert!("partners".parse::<Collection>().is_err());
    }

    #[test]
    fn test_integrity_keys_match_collections() {
        let registry = RecordRegistry::standard();
        let keys: BTreeSet<_> = registry.integrity_keys().collect();
        let expected: BTreeSet<_> = Collection::ALL.iter().map(|c| c.key()).collect();
        assert_eq!(keys, expected);
    }
}
