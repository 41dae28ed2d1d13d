//! Error types for store adapters.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing a row store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A write violated a foreign-key constraint.
    ///
    /// This is a structured error kind on purpose: the engine's
    /// dependency-aware retry dispatches on it, and matching error
    /// message text would be fragile.
    #[error("foreign key violation on table {table}: {detail}")]
    ForeignKeyViolation {
        /// Table the write targeted.
        table: String,
        /// Constraint detail from the backend.
        detail: String,
    },

    /// The requested row does not exist.
    #[error("no row in table {table} with key {key}")]
    MissingRow {
        /// Table that was queried.
        table: String,
        /// Stringified primary key.
        key: String,
    },

    /// A row is missing one of its primary-key columns.
    #[error("row in table {table} is missing key column {column}")]
    MissingKeyColumn {
        /// Table the row belongs to.
        table: String,
        /// Missing column name.
        column: String,
    },

    /// A stringified key does not match the table's declared key columns.
    #[error("key {key} does not match the declared key columns of table {table}")]
    MalformedKey {
        /// Table the key was meant for.
        table: String,
        /// The offending stringified key.
        key: String,
    },

    /// The requested table is not known to the store.
    #[error("unknown table {0}")]
    UnknownTable(String),

    /// No transaction is active for a commit/rollback.
    #[error("no transaction in progress")]
    NoTransaction,

    /// Generic backend failure (I/O, network, driver).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a foreign-key violation for `table`.
    pub fn foreign_key(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ForeignKeyViolation {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// Creates a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Returns true if this error is a foreign-key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation { .. })
    }
}
