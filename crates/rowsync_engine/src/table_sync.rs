//! Full-table bidirectional reconciliation.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityHandle;
use crate::error::{SyncError, SyncResult};
use crate::stats::{SyncStats, SyncStatus, TableStats};
use crate::timestamp::normalize;
use parking_lot::RwLock;
use rowsync_store::{LocalStore, RemoteStore, Row, RowKey, StoreError, TableSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciles a fixed, dependency-ordered set of tables between the
/// local and remote stores.
///
/// One pass reconciles every table in declared order, then re-attempts
/// tables that failed solely on foreign-key violations until the retry
/// set empties, stalls, or a table exhausts its attempts. At most one
/// pass runs at a time; a trigger while one is active is a logged no-op.
pub struct TableSyncEngine<L, R> {
    config: SyncConfig,
    local: Arc<L>,
    remote: Arc<R>,
    connectivity: ConnectivityHandle,
    pass_in_flight: AtomicBool,
    status: RwLock<SyncStatus>,
    last_stats: RwLock<Option<SyncStats>>,
}

/// A table waiting in the dependency-retry set.
struct RetryEntry {
    spec: TableSpec,
    attempts: u32,
    last_detail: String,
}

impl<L, R> TableSyncEngine<L, R>
where
    L: LocalStore + 'static,
    R: RemoteStore + 'static,
{
    /// Creates an engine over the two stores.
    pub fn new(
        config: SyncConfig,
        local: Arc<L>,
        remote: Arc<R>,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            config,
            local,
            remote,
            connectivity,
            pass_in_flight: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::Idle),
            last_stats: RwLock::new(None),
        }
    }

    /// Current user-visible status.
    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Stats of the most recently completed pass, if any.
    pub fn last_stats(&self) -> Option<SyncStats> {
        self.last_stats.read().clone()
    }

    /// Runs a full reconciliation pass.
    ///
    /// Returns `Ok(None)` when the trigger was ignored: another pass is
    /// already in flight, or `force` is false and automatic sync is
    /// disabled. Fails only on environment preconditions (offline);
    /// individual table failures are captured in the returned stats.
    pub async fn sync_all(&self, force: bool) -> SyncResult<Option<SyncStats>> {
        if !force && !self.config.auto_sync {
            debug!("automatic sync disabled, ignoring trigger");
            return Ok(None);
        }
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        if self.pass_in_flight.swap(true, Ordering::SeqCst) {
            debug!("sync pass already in flight, ignoring trigger");
            return Ok(None);
        }

        *self.status.write() = SyncStatus::Syncing;
        let stats = self.run_pass().await;
        *self.status.write() = stats.status();
        *self.last_stats.write() = Some(stats.clone());
        self.pass_in_flight.store(false, Ordering::SeqCst);

        info!(
            uploaded = stats.uploaded,
            downloaded = stats.downloaded,
            conflicts = stats.conflicts,
            failures = stats.errors.len(),
            "sync pass finished"
        );
        Ok(Some(stats))
    }

    /// Explicit "sync now": runs a pass regardless of the automatic-sync
    /// switch. Still refuses offline and still yields to an in-flight pass.
    pub async fn force_sync_all(&self) -> SyncResult<Option<SyncStats>> {
        self.sync_all(true).await
    }

    /// Loops forever, running a pass on every offline-to-online edge.
    pub fn spawn_online_trigger(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        L: Send + Sync,
        R: Send + Sync,
    {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                engine.connectivity.wait_for_online_edge().await;
                debug!("connectivity restored, triggering sync pass");
                if let Err(error) = engine.sync_all(false).await {
                    warn!(%error, "reconnect-triggered sync failed to start");
                }
            }
        })
    }

    async fn run_pass(&self) -> SyncStats {
        let mut stats = SyncStats::default();
        let mut retry_set: Vec<RetryEntry> = Vec::new();

        for spec in &self.config.tables {
            match self.attempt_table(spec).await {
                Ok(table_stats) => stats.record_table(&spec.name, table_stats),
                Err(error) if error.is_foreign_key_violation() => {
                    debug!(table = %spec.name, %error, "deferring table for dependency retry");
                    retry_set.push(RetryEntry {
                        spec: spec.clone(),
                        attempts: 1,
                        last_detail: error.to_string(),
                    });
                }
                Err(error) => {
                    warn!(table = %spec.name, %error, "table failed");
                    stats.record_failure(&spec.name, error);
                }
            }
        }

        // Re-attempt deferred tables until the set empties or stalls.
        while !retry_set.is_empty() {
            let mut progressed = false;
            let mut remaining = Vec::new();

            for entry in retry_set {
                if entry.attempts >= self.config.max_table_attempts {
                    stats.record_failure(
                        &entry.spec.name,
                        SyncError::RetriesExhausted {
                            table: entry.spec.name.clone(),
                            attempts: entry.attempts,
                            detail: entry.last_detail,
                        },
                    );
                    continue;
                }
                match self.attempt_table(&entry.spec).await {
                    Ok(table_stats) => {
                        stats.record_table(&entry.spec.name, table_stats);
                        progressed = true;
                    }
                    Err(error) if error.is_foreign_key_violation() => {
                        remaining.push(RetryEntry {
                            spec: entry.spec,
                            attempts: entry.attempts + 1,
                            last_detail: error.to_string(),
                        });
                    }
                    Err(error) => {
                        stats.record_failure(&entry.spec.name, error);
                    }
                }
            }

            if !progressed {
                for entry in &remaining {
                    stats.record_failure(
                        &entry.spec.name,
                        SyncError::DependencyFixpoint {
                            table: entry.spec.name.clone(),
                            detail: entry.last_detail.clone(),
                        },
                    );
                }
                break;
            }
            retry_set = remaining;
        }

        stats
    }

    /// Races one table's reconciliation against the configured timeout.
    ///
    /// A timed-out table is reported as failed and is not placed in the
    /// dependency-retry set.
    async fn attempt_table(&self, spec: &TableSpec) -> SyncResult<TableStats> {
        match tokio::time::timeout(self.config.table_timeout, self.sync_table(spec)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::TableTimeout {
                table: spec.name.clone(),
                seconds: self.config.table_timeout.as_secs(),
            }),
        }
    }

    /// Reconciles one table: remote-to-local first, then local-to-remote.
    ///
    /// Foreign-key violations abort the attempt so the pass-level retry
    /// can reorder it behind its dependencies; other write errors are
    /// recorded per row and do not abort the table.
    pub async fn sync_table(&self, spec: &TableSpec) -> SyncResult<TableStats> {
        let mut stats = TableStats::default();
        let policy = self.config.missing_timestamp;

        let remote_rows = self.remote.select_all(spec).await?;
        let local_rows = self.local.select_all(spec).await?;

        let mut local_index: HashMap<RowKey, Row> = HashMap::with_capacity(local_rows.len());
        for row in local_rows {
            match row.key(spec) {
                Ok(key) => {
                    local_index.insert(key, row);
                }
                Err(error) => stats.row_errors.push(error.to_string()),
            }
        }
        let mut remote_index: HashMap<RowKey, Row> = HashMap::with_capacity(remote_rows.len());
        for row in remote_rows {
            match row.key(spec) {
                Ok(key) => {
                    remote_index.insert(key, row);
                }
                Err(error) => stats.row_errors.push(error.to_string()),
            }
        }

        // Remote to local.
        for (key, remote_row) in &remote_index {
            match local_index.get(key) {
                None => {
                    self.apply_local(spec, remote_row.clone(), &mut stats)
                        .await?;
                    local_index.insert(key.clone(), remote_row.clone());
                    stats.downloaded += 1;
                }
                Some(local_row) => {
                    let remote_ts = normalize(remote_row.last_changed(), policy);
                    let local_ts = normalize(local_row.last_changed(), policy);
                    // Strictly newer wins; on a tie the local row is kept.
                    if remote_ts > local_ts {
                        let mut merged = local_row.clone();
                        merged.overwrite_from(remote_row, spec);
                        self.apply_local(spec, merged.clone(), &mut stats).await?;
                        local_index.insert(key.clone(), merged);
                        stats.downloaded += 1;
                        stats.conflicts += 1;
                    }
                }
            }
        }

        // Local to remote.
        for (key, local_row) in &local_index {
            match remote_index.get(key) {
                None => {
                    match self.remote.insert(spec, local_row.clone()).await {
                        Ok(()) => stats.uploaded += 1,
                        Err(error) if error.is_foreign_key_violation() => {
                            return Err(error.into())
                        }
                        Err(error) => stats.row_errors.push(error.to_string()),
                    }
                }
                Some(remote_row) => {
                    let local_ts = normalize(local_row.last_changed(), policy);
                    let remote_ts = normalize(remote_row.last_changed(), policy);
                    if local_ts > remote_ts {
                        match self.remote.update(spec, key, local_row.clone()).await {
                            Ok(()) => {
                                stats.uploaded += 1;
                                stats.conflicts += 1;
                            }
                            Err(error) if error.is_foreign_key_violation() => {
                                return Err(error.into())
                            }
                            Err(error) => stats.row_errors.push(error.to_string()),
                        }
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Writes a pulled row locally, splitting foreign-key failures (which
    /// abort the table attempt) from per-row failures (which do not).
    async fn apply_local(
        &self,
        spec: &TableSpec,
        row: Row,
        stats: &mut TableStats,
    ) -> SyncResult<()> {
        match self.local.upsert(spec, row).await {
            Ok(()) => Ok(()),
            Err(error @ StoreError::ForeignKeyViolation { .. }) => Err(error.into()),
            Err(error) => {
                stats.row_errors.push(error.to_string());
                Ok(())
            }
        }
    }
}
