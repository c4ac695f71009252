//! Storage error handling
//!
//! Provides typed errors for the small store, the blob store and their hosts,
//! with descriptive messages and recovery suggestions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A write would push the store past its quota
    #[error(
        "Quota exceeded writing '{key}': needs {needed} bytes, {available} of {capacity} available"
    )]
    QuotaExceeded {
        key: String,
        needed: u64,
        available: u64,
        capacity: u64,
    },

    /// Disk is full
    #[error("Disk full while writing to '{path}'. Free up disk space and try again.")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record under a known key could not be parsed
    #[error("Record '{key}' is corrupted: {details}")]
    CorruptRecord { key: String, details: String },

    /// The owning entity of an attachment does not exist
    #[error("No {collection} entity with id '{entity_id}'")]
    EntityNotFound {
        collection: String,
        entity_id: String,
    },

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    TaskJoin(String),

    /// A storage lock was poisoned by a panicking holder
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StorageError::DiskFull {
                path,
                source: error,
            },
            _ => StorageError::Io(error),
        }
    }

    /// Whether this error is the host signalling quota exhaustion
    ///
    /// A full disk is treated the same way: eviction may free enough room.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            StorageError::QuotaExceeded { .. } | StorageError::DiskFull { .. } => true,
            StorageError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::DiskFull
            }
            _ => false,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::QuotaExceeded { .. }
                | StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::CorruptRecord { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::QuotaExceeded { .. } => {
                Some("Remove cached data or export records, then retry the write.")
            }
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions for the data directory.")
            }
            StorageError::CorruptRecord { .. } => {
                Some("The record is read as empty. Run `binvault recover` to restore it from the last snapshot.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StorageError::PermissionDenied { .. }));
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
        assert!(!err.is_quota_exceeded());
    }

    #[test]
    fn test_disk_full_counts_as_quota() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StorageError::DiskFull { .. }));
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn test_quota_exceeded_display() {
        let err = StorageError::QuotaExceeded {
            key: "bales".to_string(),
            needed: 120,
            available: 20,
            capacity: 100,
        };

        assert!(err.is_quota_exceeded());
        assert!(err.is_recoverable());
        let msg = err.to_string();
        assert!(msg.contains("bales"));
        assert!(msg.contains("120"));
    }

    #[test]
    fn test_sqlite_full_counts_as_quota() {
        let err = StorageError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn test_entity_not_found_display() {
        let err = StorageError::EntityNotFound {
            collection: "bins".to_string(),
            entity_id: "b-7".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bins"));
        assert!(msg.contains("b-7"));
        assert!(!err.is_recoverable());
    }
}
