//! Statistics reported by the engine and the change queue.

/// Aggregate status of the sync subsystem, for user-visible display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// No pass has run yet or the last pass finished long ago.
    #[default]
    Idle,
    /// A pass is in flight.
    Syncing,
    /// The last pass finished without errors.
    Success,
    /// The last pass recorded at least one failure.
    Error,
}

/// Per-table counters from one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Rows pushed to the remote side.
    pub uploaded: u64,
    /// Rows pulled into the local side.
    pub downloaded: u64,
    /// Rows where both sides existed and one overwrote the other.
    pub conflicts: u64,
    /// Row-level write errors that did not abort the table.
    pub row_errors: Vec<String>,
}

/// A table that failed permanently within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFailure {
    /// Table name.
    pub table: String,
    /// Human-readable failure description.
    pub error: String,
}

/// Counters for one full reconciliation pass.
///
/// Rebuilt fresh on every pass; never merged across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total rows pushed to the remote side.
    pub uploaded: u64,
    /// Total rows pulled into the local side.
    pub downloaded: u64,
    /// Total conflicting rows resolved by last-writer-wins.
    pub conflicts: u64,
    /// Per-table breakdown, in the order tables completed.
    pub tables: Vec<(String, TableStats)>,
    /// Tables that failed permanently this pass.
    pub errors: Vec<TableFailure>,
}

impl SyncStats {
    /// Folds one table's counters into the pass totals.
    ///
    /// Row-level write errors surface in the pass error list too, so a
    /// pass with only row failures still reports [`SyncStatus::Error`].
    pub fn record_table(&mut self, table: &str, stats: TableStats) {
        self.uploaded += stats.uploaded;
        self.downloaded += stats.downloaded;
        self.conflicts += stats.conflicts;
        for row_error in &stats.row_errors {
            self.errors.push(TableFailure {
                table: table.to_string(),
                error: row_error.clone(),
            });
        }
        self.tables.push((table.to_string(), stats));
    }

    /// Records a permanent table failure.
    pub fn record_failure(&mut self, table: &str, error: impl std::fmt::Display) {
        self.errors.push(TableFailure {
            table: table.to_string(),
            error: error.to_string(),
        });
    }

    /// Final status of the pass: success only if nothing failed.
    pub fn status(&self) -> SyncStatus {
        if self.errors.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Error
        }
    }
}

/// Counters for the record change queue, for operator visibility.
///
/// `failed_syncs` includes changes dropped after exhausting their
/// retries; those represent permanent data-loss risk and are the number
/// an operator needs to watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Changes ever enqueued.
    pub total_changes: u64,
    /// Changes pushed successfully.
    pub successful_syncs: u64,
    /// Attempts that failed, including terminal drops.
    pub failed_syncs: u64,
    /// Changes currently pending.
    pub pending_changes: u64,
}
