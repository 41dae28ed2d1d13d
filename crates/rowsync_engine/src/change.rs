//! Record-level change descriptions.

use chrono::{DateTime, TimeZone, Utc};
use rowsync_store::Row;
use uuid::Uuid;

/// A mutation kind queued for the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Insert the payload as a new remote row.
    Insert,
    /// Update the remote row; falls back to insert if the row never made
    /// it to the remote side.
    Update,
    /// Soft-delete the remote row by setting `deleted_at`.
    ///
    /// Deliberately non-destructive: the queue never issues a remote hard
    /// delete, so a "fix" that removes rows remotely would be a behavior
    /// change, not a cleanup.
    Delete,
}

/// Urgency tiers controlling how soon a queued change is flushed.
///
/// Ascending urgency, descending delay: CRITICAL flushes immediately
/// (when automatic flushing is on), LOW waits five minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncPriority {
    /// Save operations and deletions.
    Critical = 1,
    /// Content changes.
    High = 2,
    /// Metadata changes.
    Medium = 3,
    /// UI state, preferences.
    Low = 4,
}

impl SyncPriority {
    /// All priorities, most urgent first (flush order).
    pub fn all() -> [SyncPriority; 4] {
        [Self::Critical, Self::High, Self::Medium, Self::Low]
    }
}

/// The unique handle of a single queued change.
///
/// Time-derived plus random: the enqueue instant is recoverable from the
/// id, which is what the retention sweep uses to age out processed ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeId {
    millis: i64,
    nonce: Uuid,
}

impl ChangeId {
    /// Creates an id stamped with the current instant.
    pub fn generate() -> Self {
        Self {
            millis: Utc::now().timestamp_millis(),
            nonce: Uuid::new_v4(),
        }
    }

    /// Returns the instant the id was issued.
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    #[cfg(test)]
    pub(crate) fn issued_at_for_test(millis: i64) -> Self {
        Self {
            millis,
            nonce: Uuid::new_v4(),
        }
    }
}

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.nonce.simple())
    }
}

/// A discrete pending mutation for one record.
///
/// Identity for coalescing is `(table, record_id)`; `id` is the unique
/// handle used to mark this particular change processed.
#[derive(Debug, Clone)]
pub struct RecordChange {
    /// Unique handle for this change.
    pub id: ChangeId,
    /// Target table.
    pub table: String,
    /// Stringified primary key of the record.
    pub record_id: String,
    /// Mutation kind.
    pub operation: Operation,
    /// Row payload for inserts and updates.
    pub payload: Option<Row>,
    /// Urgency tier.
    pub priority: SyncPriority,
    /// Enqueue instant.
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far; mutated in place on failure.
    pub retry_count: u32,
}

impl RecordChange {
    /// Creates a fresh change with a generated id and zero retries.
    pub fn new(
        table: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        payload: Option<Row>,
        priority: SyncPriority,
    ) -> Self {
        Self {
            id: ChangeId::generate(),
            table: table.into(),
            record_id: record_id.into(),
            operation,
            payload,
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// The coalescing identity of this change.
    pub fn record_key(&self) -> (String, String) {
        (self.table.clone(), self.record_id.clone())
    }
}
