//! Error types for the sync engine.

use rowsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The environment is offline; no I/O was attempted.
    #[error("offline: sync refused to start")]
    Offline,

    /// A store adapter failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A table's reconciliation exceeded its timeout.
    #[error("table {table} timed out after {seconds}s")]
    TableTimeout {
        /// Table that timed out.
        table: String,
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// A table exhausted its dependency-retry attempts.
    #[error("table {table} still failing after {attempts} attempts: {detail}")]
    RetriesExhausted {
        /// Table that kept failing.
        table: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure detail.
        detail: String,
    },

    /// A table made no progress in the dependency-retry fixpoint.
    #[error("table {table} blocked on unmet dependencies: {detail}")]
    DependencyFixpoint {
        /// Table left in the retry set.
        table: String,
        /// Last foreign-key failure detail.
        detail: String,
    },
}

impl SyncError {
    /// Returns true if this error is a foreign-key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_foreign_key_violation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_passthrough() {
        let err = SyncError::from(StoreError::foreign_key("sample", "parent missing"));
        assert!(err.is_foreign_key_violation());
        assert!(!SyncError::Offline.is_foreign_key_violation());
        assert!(!SyncError::TableTimeout {
            table: "t".into(),
            seconds: 30
        }
        .is_foreign_key_violation());
    }

    #[test]
    fn error_display() {
        let err = SyncError::TableTimeout {
            table: "base_result".into(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "table base_result timed out after 30s");
    }
}
