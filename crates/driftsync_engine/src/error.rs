//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync round.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Authenticated mode without a resolvable user id. Fatal,
    /// detected before any I/O.
    #[error("invalid user id")]
    InvalidUserId,

    /// A locally created id already exists remotely. Two independent
    /// creates can never legitimately share an id, so this is always a
    /// protocol violation and rejects the whole round.
    #[error("document {id:?} in {collection:?} already exists on the remote store")]
    RemoteIdAlreadyExists {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// An update/delete target was modified remotely after the
    /// replica's checkpoint.
    #[error("document {id:?} in {collection:?} was modified after the checkpoint")]
    RemoteRecordModified {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// An update/delete target was tombstoned remotely after the
    /// replica's checkpoint.
    #[error("document {id:?} in {collection:?} was deleted after the checkpoint")]
    RemoteRecordDeleted {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// An update/delete target does not exist remotely at all.
    #[error("document {id:?} in {collection:?} does not exist on the remote store")]
    RemoteRecordMissing {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// The round stages more writes than the provider's atomic unit
    /// can hold and chunked commit was not opted into.
    #[error("push round of {staged} writes exceeds the provider limit of {limit} per atomic unit")]
    BatchLimitExceeded {
        /// Writes staged for the round.
        staged: usize,
        /// Provider writes-per-unit limit.
        limit: usize,
    },

    /// Remote provider failure.
    #[error("storage error: {message}")]
    Storage {
        /// Error message.
        message: String,
        /// Whether the caller may retry the round.
        retryable: bool,
    },

    /// Local store collaborator failure.
    #[error("local store error: {0}")]
    Local(String),

    /// A push named a collection absent from the configuration.
    #[error("collection {0:?} is not configured for sync")]
    CollectionNotConfigured(String),

    /// A pushed change set listed one id in more than one bucket.
    #[error("document {id:?} in {collection:?} appears in more than one change bucket")]
    InvalidChangeSet {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// A round was started while another round was still running on
    /// the same coordinator.
    #[error("a sync round is already in progress")]
    SyncInProgress,

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a non-retryable storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable storage error.
    pub fn storage_retryable(message: impl Into<String>) -> Self {
        SyncError::Storage {
            message: message.into(),
            retryable: true,
        }
    }

    /// Whether this error reports a conflict with concurrent remote
    /// writes. Conflicts are resolved by re-pulling and retrying the
    /// round, never by patching individual records.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteIdAlreadyExists { .. }
                | SyncError::RemoteRecordModified { .. }
                | SyncError::RemoteRecordDeleted { .. }
                | SyncError::RemoteRecordMissing { .. }
        )
    }

    /// Whether the caller may retry the round as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Storage { retryable, .. } => *retryable,
            SyncError::SyncInProgress => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification() {
        let modified = SyncError::RemoteRecordModified {
            collection: "todos".into(),
            id: "t1".into(),
        };
        assert!(modified.is_conflict());
        assert!(!modified.is_retryable());

        assert!(!SyncError::InvalidUserId.is_conflict());
        assert!(!SyncError::storage("connection reset").is_conflict());
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::storage_retryable("deadline exceeded").is_retryable());
        assert!(!SyncError::storage("permission denied").is_retryable());
        assert!(SyncError::SyncInProgress.is_retryable());
        assert!(!SyncError::InvalidUserId.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::BatchLimitExceeded {
            staged: 600,
            limit: 500,
        };
        assert!(err.to_string().contains("600"));
        assert!(err.to_string().contains("500"));

        let err = SyncError::RemoteIdAlreadyExists {
            collection: "todos".into(),
            id: "t1".into(),
        };
        assert!(err.to_string().contains("todos"));
        assert!(err.to_string().contains("t1"));
    }
}
