//! Sync mode

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which tier serves reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Remote is unreachable or not configured; the cache answers everything
    LocalOnly,
    /// Remote is believed reachable; reads go remote first
    RemotePreferred,
}

impl SyncMode {
    pub fn is_remote_preferred(self) -> bool {
        self == SyncMode::RemotePreferred
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::LocalOnly => "local_only",
            SyncMode::RemotePreferred => "remote_preferred",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
