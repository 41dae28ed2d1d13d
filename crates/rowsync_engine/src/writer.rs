//! Transactional multi-row local writes feeding the change queue.
//!
//! A domain event (a completed measurement, a roster edit) usually
//! touches several tables at once. The writer makes the local persistence
//! of one event all-or-nothing, and on commit queues every written row
//! for the remote side so the event travels as one unit.

use crate::change::{ChangeId, Operation, SyncPriority};
use crate::error::SyncResult;
use crate::queue::{ChangeRequest, RecordChangeQueue};
use crate::timestamp;
use rowsync_store::{LocalStore, RemoteStore, Row, StoreError, TableSpec, LAST_CHANGED};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One logical domain event: a set of rows across tables that must
/// persist together.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    /// Urgency tier for the queued changes of this event.
    pub priority: SyncPriority,
    /// `(table, row)` pairs, applied in order.
    pub rows: Vec<(String, Row)>,
}

impl WriteEvent {
    /// Creates an empty event at `priority`.
    pub fn new(priority: SyncPriority) -> Self {
        Self {
            priority,
            rows: Vec::new(),
        }
    }

    /// Adds one row to the event.
    pub fn with_row(mut self, table: impl Into<String>, row: Row) -> Self {
        self.rows.push((table.into(), row));
        self
    }
}

/// Writes domain events to the local store transactionally and queues
/// the written rows for the remote side on commit.
pub struct ResultWriter<L, R> {
    local: Arc<L>,
    queue: Arc<RecordChangeQueue<R>>,
    tables: HashMap<String, TableSpec>,
}

impl<L, R> ResultWriter<L, R>
where
    L: LocalStore,
    R: RemoteStore + Send + Sync + 'static,
{
    /// Creates a writer over `local` for the given tables.
    pub fn new(tables: Vec<TableSpec>, local: Arc<L>, queue: Arc<RecordChangeQueue<R>>) -> Self {
        Self {
            local,
            queue,
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    /// Persists `event` locally as one transaction, then queues every row.
    ///
    /// Rows without a `last_changed` value are stamped with the write
    /// instant, which is what makes the local version win conflicts until
    /// someone else writes later. Any failure rolls the whole event back
    /// and queues nothing.
    pub async fn write_event(&self, event: WriteEvent) -> SyncResult<Vec<ChangeId>> {
        let now = timestamp::now();
        self.local.begin().await?;

        let mut requests = Vec::with_capacity(event.rows.len());
        for (table, mut row) in event.rows {
            if row.last_changed().is_none() {
                row.set(LAST_CHANGED, now.clone());
            }
            match self.persist_row(&table, row).await {
                Ok(request) => requests.push(request),
                Err(error) => {
                    warn!(%table, %error, "event write failed, rolling back");
                    if let Err(rollback_error) = self.local.rollback().await {
                        warn!(%rollback_error, "rollback after failed event also failed");
                    }
                    return Err(error);
                }
            }
        }

        self.local.commit().await?;
        debug!(rows = requests.len(), "event committed, queuing for remote");
        Ok(self.queue.enqueue_batch(requests, event.priority))
    }

    async fn persist_row(&self, table: &str, row: Row) -> SyncResult<ChangeRequest> {
        let spec = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let record_id = row.key(spec)?.to_string();
        self.local.upsert(spec, row.clone()).await?;
        Ok(ChangeRequest {
            table: table.to_string(),
            record_id,
            // Update falls back to insert remotely, so it is correct for
            // both fresh rows and edits.
            operation: Operation::Update,
            payload: Some(row),
        })
    }
}
