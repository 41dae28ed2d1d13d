//! Record-level change queue.
//!
//! Holds discrete pending mutations and pushes them to the remote store
//! on per-priority timers, in fixed-size batches, with bounded
//! exponential-backoff retry. The queue is the path committed local
//! writes take to the remote side between full reconciliation passes.

use crate::change::{ChangeId, Operation, RecordChange, SyncPriority};
use crate::config::QueueConfig;
use crate::connectivity::ConnectivityHandle;
use crate::error::{SyncError, SyncResult};
use crate::stats::QueueStats;
use crate::timestamp;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rowsync_store::{RemoteStore, Row, RowKey, StoreError, TableSpec, DELETED_AT, LAST_CHANGED};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One change handed to [`RecordChangeQueue::enqueue_batch`].
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    /// Target table.
    pub table: String,
    /// Stringified primary key of the record.
    pub record_id: String,
    /// Mutation kind.
    pub operation: Operation,
    /// Row payload for inserts and updates.
    pub payload: Option<Row>,
}

/// An armed per-priority flush timer.
///
/// The generation counter is the cancel handle: re-arming bumps it, and a
/// timer task that wakes up under a stale generation does nothing.
struct ScheduleEntry {
    generation: u64,
    next_fire: tokio::time::Instant,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<RecordChange>,
    processed: HashSet<ChangeId>,
    schedulers: HashMap<SyncPriority, ScheduleEntry>,
}

/// An in-memory queue of pending record mutations.
///
/// Enqueuing coalesces by `(table, record id)`: the newest intent wins
/// regardless of the previous change's priority. Flushes are serialized
/// by a coarse guard; a flush for one priority processes its matching
/// changes in fixed-size batches whose members run concurrently.
pub struct RecordChangeQueue<R> {
    config: QueueConfig,
    remote: Arc<R>,
    tables: HashMap<String, TableSpec>,
    connectivity: ConnectivityHandle,
    flush_in_flight: AtomicBool,
    state: Mutex<QueueState>,
    stats: Mutex<QueueStats>,
}

impl<R> RecordChangeQueue<R>
where
    R: RemoteStore + Send + Sync + 'static,
{
    /// Creates a queue pushing to `remote` for the given tables.
    pub fn new(
        config: QueueConfig,
        tables: Vec<TableSpec>,
        remote: Arc<R>,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            config,
            remote,
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            connectivity,
            flush_in_flight: AtomicBool::new(false),
            state: Mutex::new(QueueState::default()),
            stats: Mutex::new(QueueStats::default()),
        }
    }

    /// Queues one mutation, replacing any pending change for the same
    /// record, and (when automatic flushing is on) arms the flush timer
    /// for the change's priority class.
    pub fn enqueue(
        self: &Arc<Self>,
        table: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        payload: Option<Row>,
        priority: SyncPriority,
    ) -> ChangeId {
        let change = RecordChange::new(table, record_id, operation, payload, priority);
        let id = change.id.clone();
        debug!(
            table = %change.table,
            record = %change.record_id,
            ?operation,
            ?priority,
            "queuing record change"
        );

        {
            let mut state = self.state.lock();
            let key = change.record_key();
            state.pending.retain(|c| c.record_key() != key);
            state.pending.push(change);
        }
        self.stats.lock().total_changes += 1;

        if self.config.auto_flush {
            self.arm(priority);
        }
        id
    }

    /// Queues the row identities of one committed logical event.
    ///
    /// This is the result writer's entry point; every change shares one
    /// priority class so the event's rows flush together.
    pub fn enqueue_batch(
        self: &Arc<Self>,
        requests: Vec<ChangeRequest>,
        priority: SyncPriority,
    ) -> Vec<ChangeId> {
        requests
            .into_iter()
            .map(|request| {
                self.enqueue(
                    request.table,
                    request.record_id,
                    request.operation,
                    request.payload,
                    priority,
                )
            })
            .collect()
    }

    /// Flushes every priority class in urgency order, ignoring timers.
    ///
    /// Refuses to run while offline; this is the explicit "sync now"
    /// trigger.
    pub async fn force_flush_all(self: &Arc<Self>) -> SyncResult<()> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        for priority in SyncPriority::all() {
            self.process_priority(priority).await;
        }
        Ok(())
    }

    /// Drops every pending change and processed-id record.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.processed.clear();
    }

    /// Number of changes currently pending.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Snapshot of the pending changes, in approximate enqueue order.
    pub fn pending(&self) -> Vec<RecordChange> {
        self.state.lock().pending.clone()
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let mut stats = *self.stats.lock();
        stats.pending_changes = self.state.lock().pending.len() as u64;
        stats
    }

    /// The armed fire instant for `priority`, if a timer is pending.
    pub fn scheduled_fire(&self, priority: SyncPriority) -> Option<tokio::time::Instant> {
        self.state
            .lock()
            .schedulers
            .get(&priority)
            .map(|entry| entry.next_fire)
    }

    /// (Re)arms the flush timer for `priority` at its configured delay.
    ///
    /// Always restarts: the previous timer task is cancelled by bumping
    /// the generation, and a fresh one is spawned against the new
    /// deadline.
    fn arm(self: &Arc<Self>, priority: SyncPriority) {
        let delay = self.config.delays.delay_for(priority);
        let generation = {
            let mut state = self.state.lock();
            let entry = state
                .schedulers
                .entry(priority)
                .or_insert_with(|| ScheduleEntry {
                    generation: 0,
                    next_fire: tokio::time::Instant::now(),
                });
            entry.generation += 1;
            entry.next_fire = tokio::time::Instant::now() + delay;
            entry.generation
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // Fire only under the armed generation, and disarm on fire so
            // the entry never reports a spent deadline.
            let still_armed = {
                let mut state = queue.state.lock();
                match state.schedulers.get(&priority) {
                    Some(entry) if entry.generation == generation => {
                        state.schedulers.remove(&priority);
                        true
                    }
                    _ => false,
                }
            };
            if still_armed {
                queue.process_priority(priority).await;
            }
        });
    }

    /// Flushes the pending changes of one priority class.
    ///
    /// Skipped entirely while offline or while another flush is running.
    /// Returns the number of changes that succeeded.
    pub async fn process_priority(self: &Arc<Self>, priority: SyncPriority) -> usize {
        if !self.connectivity.is_online() {
            debug!(?priority, "skipping flush: offline");
            return 0;
        }
        if self.flush_in_flight.swap(true, Ordering::SeqCst) {
            debug!(?priority, "skipping flush: another flush is running");
            return 0;
        }

        let processed = self.flush_priority(priority).await;
        self.flush_in_flight.store(false, Ordering::SeqCst);
        processed
    }

    async fn flush_priority(self: &Arc<Self>, priority: SyncPriority) -> usize {
        let candidates: Vec<RecordChange> = {
            let state = self.state.lock();
            state
                .pending
                .iter()
                .filter(|change| {
                    change.priority == priority
                        && change.retry_count < self.config.max_retries
                        && !state.processed.contains(&change.id)
                })
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }
        debug!(?priority, count = candidates.len(), "processing changes");

        let mut succeeded = 0;
        for batch in candidates.chunks(self.config.batch_size) {
            succeeded += self.process_batch(batch).await;
        }
        succeeded
    }

    /// Processes one batch, its changes concurrently, then applies the
    /// outcomes: successes are marked processed and removed, failures
    /// retry with exponential backoff until they exhaust their budget.
    async fn process_batch(self: &Arc<Self>, batch: &[RecordChange]) -> usize {
        let mut in_flight = JoinSet::new();
        for change in batch {
            let queue = Arc::clone(self);
            let change = change.clone();
            in_flight.spawn(async move {
                let outcome = queue.process_change(&change).await;
                (change, outcome)
            });
        }

        let mut succeeded = 0;
        while let Some(joined) = in_flight.join_next().await {
            let Ok((change, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    succeeded += 1;
                    let mut state = self.state.lock();
                    state.processed.insert(change.id.clone());
                    state.pending.retain(|c| c.id != change.id);
                    self.stats.lock().successful_syncs += 1;
                }
                Err(error) => {
                    self.stats.lock().failed_syncs += 1;
                    self.handle_failure(&change, &error);
                }
            }
        }
        succeeded
    }

    fn handle_failure(self: &Arc<Self>, change: &RecordChange, error: &SyncError) {
        let retry_count = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.iter_mut().find(|c| c.id == change.id) else {
                return;
            };
            pending.retry_count += 1;
            pending.retry_count
        };

        if retry_count >= self.config.max_retries {
            // Bounded effort, not a correctness guarantee: the change is
            // dropped and the failure stays visible in failed_syncs.
            warn!(
                table = %change.table,
                record = %change.record_id,
                retries = retry_count,
                %error,
                "change exhausted its retries and was dropped"
            );
            let mut state = self.state.lock();
            state.processed.insert(change.id.clone());
            state.pending.retain(|c| c.id != change.id);
            return;
        }

        debug!(
            table = %change.table,
            record = %change.record_id,
            retries = retry_count,
            %error,
            "change failed, backing off"
        );
        if !self.config.auto_flush {
            return;
        }
        // Backoff is additional to the priority's base delay: sleep
        // 2^retry_count seconds, then re-arm the class timer.
        let backoff = std::time::Duration::from_secs(1u64 << retry_count.min(16));
        let priority = change.priority;
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            queue.arm(priority);
        });
    }

    /// Pushes one change to the remote store.
    async fn process_change(&self, change: &RecordChange) -> SyncResult<()> {
        let spec = self
            .tables
            .get(&change.table)
            .ok_or_else(|| StoreError::UnknownTable(change.table.clone()))?;
        let key = match &change.payload {
            Some(payload) => payload.key(spec)?,
            None => RowKey::parse(&change.record_id, spec)?,
        };

        match change.operation {
            Operation::Insert => {
                let payload = required_payload(change)?;
                self.remote.insert(spec, payload).await?;
            }
            Operation::Update => {
                let payload = required_payload(change)?;
                // A queued update for a row that never made it to the
                // remote side still succeeds as an insert.
                if self.remote.exists(spec, &key).await? {
                    self.remote.update(spec, &key, payload).await?;
                } else {
                    self.remote.insert(spec, payload).await?;
                }
            }
            Operation::Delete => {
                // Soft delete only; the remote row is never removed.
                if let Some(mut row) = self.remote.get(spec, &key).await? {
                    let now = timestamp::now();
                    row.set(DELETED_AT, now.clone());
                    row.set(LAST_CHANGED, now);
                    self.remote.update(spec, &key, row).await?;
                }
            }
        }
        Ok(())
    }

    /// Evicts processed ids and pending changes older than the retention
    /// window. Best effort: a pending change evicted before it synced is
    /// lost, which is why this logs what it drops.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.config.retention) else {
            return;
        };
        let cutoff = now - retention;
        let mut state = self.state.lock();
        state.processed.retain(|id| id.issued_at() > cutoff);

        let before = state.pending.len();
        state.pending.retain(|change| change.enqueued_at > cutoff);
        let evicted = before - state.pending.len();
        if evicted > 0 {
            warn!(evicted, "evicted unsynced changes past the retention window");
        }
    }

    /// Loops forever, sweeping at the configured interval.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                queue.sweep(Utc::now());
            }
        })
    }
}

fn required_payload(change: &RecordChange) -> SyncResult<Row> {
    change.payload.clone().ok_or_else(|| {
        StoreError::backend(format!(
            "{:?} for {}:{} has no payload",
            change.operation, change.table, change.record_id
        ))
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorityDelays;
    use rowsync_store::MemoryRemoteStore;
    use std::time::Duration;

    fn sessions() -> TableSpec {
        TableSpec::new("sessions")
    }

    fn payload(id: &str, name: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("name", name)
            .with(LAST_CHANGED, "2024-03-01T10:00:00.000Z")
    }

    fn queue_with(
        config: QueueConfig,
        remote: &Arc<MemoryRemoteStore>,
        connectivity: ConnectivityHandle,
    ) -> Arc<RecordChangeQueue<MemoryRemoteStore>> {
        Arc::new(RecordChangeQueue::new(
            config,
            vec![sessions()],
            Arc::clone(remote),
            connectivity,
        ))
    }

    #[tokio::test]
    async fn coalescing_keeps_only_the_newest_intent() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Update,
            Some(payload("s1", "a")),
            SyncPriority::High,
        );
        queue.enqueue("sessions", "s1", Operation::Delete, None, SyncPriority::Low);

        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Delete);
        assert_eq!(pending[0].priority, SyncPriority::Low);
        assert_eq!(queue.stats().total_changes, 2);
    }

    #[tokio::test]
    async fn flush_pushes_inserts_and_marks_processed() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "morning")),
            SyncPriority::Medium,
        );
        let succeeded = queue.process_priority(SyncPriority::Medium).await;

        assert_eq!(succeeded, 1);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(remote.row_count("sessions"), 1);
        assert_eq!(queue.stats().successful_syncs, 1);
    }

    #[tokio::test]
    async fn update_falls_back_to_insert_for_missing_remote_row() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Update,
            Some(payload("s1", "renamed")),
            SyncPriority::High,
        );
        assert_eq!(queue.process_priority(SyncPriority::High).await, 1);

        let row = remote
            .get(&sessions(), &RowKey::single("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("name"), Some("renamed"));
    }

    #[tokio::test]
    async fn delete_is_a_soft_delete() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.seed(&sessions(), vec![payload("s1", "morning")]);
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue("sessions", "s1", Operation::Delete, None, SyncPriority::Critical);
        assert_eq!(queue.process_priority(SyncPriority::Critical).await, 1);

        // The row is still there, marked deleted.
        let row = remote
            .get(&sessions(), &RowKey::single("s1"))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_deleted());
        assert_ne!(row.last_changed(), Some("2024-03-01T10:00:00.000Z"));
    }

    #[tokio::test]
    async fn delete_of_never_synced_row_succeeds() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue("sessions", "ghost", Operation::Delete, None, SyncPriority::Critical);
        assert_eq!(queue.process_priority(SyncPriority::Critical).await, 1);
        assert_eq!(remote.row_count("sessions"), 0);
    }

    #[tokio::test]
    async fn composite_key_delete_targets_the_right_row() {
        let spec = TableSpec::with_key("weekly_stats", &["athlete_id", "week_start"]);
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.seed(
            &spec,
            vec![Row::new()
                .with("athlete_id", "a1")
                .with("week_start", "2024-03-04")
                .with(LAST_CHANGED, "2024-03-01T10:00:00.000Z")],
        );
        let queue = Arc::new(RecordChangeQueue::new(
            QueueConfig::default(),
            vec![spec.clone()],
            Arc::clone(&remote),
            ConnectivityHandle::online(),
        ));

        queue.enqueue(
            "weekly_stats",
            "a1|2024-03-04",
            Operation::Delete,
            None,
            SyncPriority::Critical,
        );
        assert_eq!(queue.process_priority(SyncPriority::Critical).await, 1);

        let row = remote
            .get(&spec, &RowKey::composite(&["a1", "2024-03-04"]))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_deleted());

        // A key that does not match the declared columns is a failure,
        // not a silent no-op.
        queue.enqueue("weekly_stats", "a1", Operation::Delete, None, SyncPriority::Critical);
        assert_eq!(queue.process_priority(SyncPriority::Critical).await, 0);
        assert_eq!(queue.stats().failed_syncs, 1);
        assert_eq!(queue.pending()[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_flush_is_a_no_op() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_latency(Duration::from_secs(5));
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::High,
        );
        queue.enqueue(
            "sessions",
            "s2",
            Operation::Insert,
            Some(payload("s2", "y")),
            SyncPriority::Low,
        );

        let running = Arc::clone(&queue);
        let first = tokio::spawn(async move { running.process_priority(SyncPriority::High).await });
        // Let the first flush claim the guard.
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if queue.flush_in_flight.load(Ordering::SeqCst) {
                break;
            }
        }

        // The concurrent flush is skipped outright and consumes nothing.
        assert_eq!(queue.process_priority(SyncPriority::Low).await, 0);
        assert_eq!(queue.pending_len(), 2);
        assert_eq!(remote.row_count("sessions"), 0);

        // The in-flight flush finishes undisturbed.
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(remote.row_count("sessions"), 1);
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, "s2");
    }

    #[tokio::test]
    async fn offline_flush_is_skipped() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(
            QueueConfig::default(),
            &remote,
            ConnectivityHandle::offline(),
        );

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::Critical,
        );
        assert_eq!(queue.process_priority(SyncPriority::Critical).await, 0);
        assert_eq!(queue.pending_len(), 1);
        assert!(matches!(
            queue.force_flush_all().await,
            Err(SyncError::Offline)
        ));
    }

    #[tokio::test]
    async fn failed_change_is_dropped_after_max_retries() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_next_writes("sessions", u32::MAX, StoreError::backend("unreachable"));
        let queue = queue_with(
            QueueConfig::default().with_max_retries(3),
            &remote,
            ConnectivityHandle::online(),
        );

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::High,
        );

        // Attempt 1, 2: retry budget not yet exhausted.
        assert_eq!(queue.process_priority(SyncPriority::High).await, 0);
        assert_eq!(queue.pending()[0].retry_count, 1);
        assert_eq!(queue.process_priority(SyncPriority::High).await, 0);
        assert_eq!(queue.pending()[0].retry_count, 2);

        // Attempt 3 exhausts the budget: dropped, counted, not retried.
        assert_eq!(queue.process_priority(SyncPriority::High).await, 0);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.stats().failed_syncs, 3);
        assert_eq!(queue.stats().successful_syncs, 0);

        // Nothing left to do.
        assert_eq!(queue.process_priority(SyncPriority::High).await, 0);
        assert_eq!(queue.stats().failed_syncs, 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_budget() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_next_writes("sessions", 1, StoreError::backend("blip"));
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::High,
        );
        assert_eq!(queue.process_priority(SyncPriority::High).await, 0);
        assert_eq!(queue.process_priority(SyncPriority::High).await, 1);
        assert_eq!(remote.row_count("sessions"), 1);
        let stats = queue.stats();
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.successful_syncs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_flush_fires_after_the_priority_delay() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(
            QueueConfig::default().with_auto_flush(true),
            &remote,
            ConnectivityHandle::online(),
        );

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::High,
        );
        assert!(queue.scheduled_fire(SyncPriority::High).is_some());
        assert_eq!(remote.row_count("sessions"), 0);

        // HIGH flushes after five seconds, and the spent timer disarms.
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(remote.row_count("sessions"), 1);
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.scheduled_fire(SyncPriority::High).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn critical_flushes_immediately_only_with_auto_flush() {
        let remote = Arc::new(MemoryRemoteStore::new());

        // auto_flush off: CRITICAL waits for an explicit flush.
        let manual = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());
        manual.enqueue(
            "sessions",
            "m1",
            Operation::Insert,
            Some(payload("m1", "x")),
            SyncPriority::Critical,
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(remote.row_count("sessions"), 0);
        manual.force_flush_all().await.unwrap();
        assert_eq!(remote.row_count("sessions"), 1);

        // auto_flush on: CRITICAL fires without waiting.
        let auto = queue_with(
            QueueConfig::default().with_auto_flush(true),
            &remote,
            ConnectivityHandle::online(),
        );
        auto.enqueue(
            "sessions",
            "a1",
            Operation::Insert,
            Some(payload("a1", "y")),
            SyncPriority::Critical,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(remote.row_count("sessions"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_previous_timer() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let delays = PriorityDelays {
            high: Duration::from_secs(5),
            ..PriorityDelays::default()
        };
        let queue = queue_with(
            QueueConfig::default()
                .with_auto_flush(true)
                .with_delays(delays),
            &remote,
            ConnectivityHandle::online(),
        );

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "a")),
            SyncPriority::High,
        );
        tokio::time::sleep(Duration::from_secs(3)).await;

        // Re-enqueue resets the HIGH timer; the old deadline must not fire.
        queue.enqueue(
            "sessions",
            "s1",
            Operation::Update,
            Some(payload("s1", "b")),
            SyncPriority::High,
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(remote.row_count("sessions"), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(remote.row_count("sessions"), 1);
        let row = remote
            .get(&sessions(), &RowKey::single("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("name"), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_rearms_after_two_to_the_retry_count() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_next_writes("sessions", 1, StoreError::backend("blip"));
        let delays = PriorityDelays {
            critical: Duration::ZERO,
            ..PriorityDelays::default()
        };
        let queue = queue_with(
            QueueConfig::default()
                .with_auto_flush(true)
                .with_delays(delays),
            &remote,
            ConnectivityHandle::online(),
        );

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::Critical,
        );
        // Immediate attempt fails once.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.stats().failed_syncs, 1);
        assert_eq!(remote.row_count("sessions"), 0);

        // Retry fires after the 2^1 = 2s backoff (plus zero base delay).
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(remote.row_count("sessions"), 1);
        assert_eq!(queue.stats().successful_syncs, 1);
    }

    #[tokio::test]
    async fn sweep_evicts_stale_entries() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(
            QueueConfig::default().with_retention(Duration::from_secs(3600)),
            &remote,
            ConnectivityHandle::online(),
        );

        queue.enqueue(
            "sessions",
            "old",
            Operation::Insert,
            Some(payload("old", "x")),
            SyncPriority::Low,
        );
        {
            // Age the change past the retention window.
            let mut state = queue.state.lock();
            state.pending[0].enqueued_at = Utc::now() - chrono::Duration::hours(2);
            state
                .processed
                .insert(ChangeId::issued_at_for_test(0));
        }
        queue.enqueue(
            "sessions",
            "fresh",
            Operation::Insert,
            Some(payload("fresh", "y")),
            SyncPriority::Low,
        );

        queue.sweep(Utc::now());
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, "fresh");
        assert!(queue.state.lock().processed.is_empty());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(QueueConfig::default(), &remote, ConnectivityHandle::online());

        queue.enqueue(
            "sessions",
            "s1",
            Operation::Insert,
            Some(payload("s1", "x")),
            SyncPriority::Low,
        );
        queue.clear();
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn batches_split_by_configured_size() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let queue = queue_with(
            QueueConfig::default().with_batch_size(2),
            &remote,
            ConnectivityHandle::online(),
        );

        for i in 0..5 {
            let id = format!("s{i}");
            queue.enqueue(
                "sessions",
                id.clone(),
                Operation::Insert,
                Some(payload(&id, "x")),
                SyncPriority::Medium,
            );
        }
        assert_eq!(queue.process_priority(SyncPriority::Medium).await, 5);
        assert_eq!(remote.row_count("sessions"), 5);
    }
}
