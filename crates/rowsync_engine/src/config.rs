//! Configuration for the sync engine and change queue.

use crate::change::SyncPriority;
use rowsync_store::TableSpec;
use std::time::Duration;

/// Policy for rows whose `last_changed` is missing or unparseable.
///
/// The store of record historically treated such rows as freshest, so a
/// malformed timestamp silently won every conflict. That stays the
/// default for compatibility, but the tie-break is an explicit choice
/// here rather than an accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingTimestampPolicy {
    /// Treat as "now": the malformed side wins against any older row.
    #[default]
    AssumeFresh,
    /// Treat as the Unix epoch: the malformed side loses to any real row.
    AssumeEpoch,
}

/// Configuration for full-table reconciliation passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tables to reconcile, in dependency order.
    pub tables: Vec<TableSpec>,
    /// Maximum attempts per table across dependency retries.
    pub max_table_attempts: u32,
    /// Timeout for a single table's reconciliation.
    pub table_timeout: Duration,
    /// Whether connectivity transitions may trigger a pass automatically.
    pub auto_sync: bool,
    /// Tie-break policy for missing or unparseable timestamps.
    pub missing_timestamp: MissingTimestampPolicy,
}

impl SyncConfig {
    /// Creates a configuration for `tables` with default limits.
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self {
            tables,
            max_table_attempts: 3,
            table_timeout: Duration::from_secs(30),
            auto_sync: false,
            missing_timestamp: MissingTimestampPolicy::default(),
        }
    }

    /// Sets the maximum attempts per table.
    pub fn with_max_table_attempts(mut self, attempts: u32) -> Self {
        self.max_table_attempts = attempts;
        self
    }

    /// Sets the per-table timeout.
    pub fn with_table_timeout(mut self, timeout: Duration) -> Self {
        self.table_timeout = timeout;
        self
    }

    /// Enables or disables automatic passes on connectivity transitions.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Sets the missing-timestamp policy.
    pub fn with_missing_timestamp(mut self, policy: MissingTimestampPolicy) -> Self {
        self.missing_timestamp = policy;
        self
    }
}

/// Scheduling delay per priority class.
#[derive(Debug, Clone)]
pub struct PriorityDelays {
    /// Delay before a CRITICAL flush.
    pub critical: Duration,
    /// Delay before a HIGH flush.
    pub high: Duration,
    /// Delay before a MEDIUM flush.
    pub medium: Duration,
    /// Delay before a LOW flush.
    pub low: Duration,
}

impl PriorityDelays {
    /// Returns the configured delay for `priority`.
    pub fn delay_for(&self, priority: SyncPriority) -> Duration {
        match priority {
            SyncPriority::Critical => self.critical,
            SyncPriority::High => self.high,
            SyncPriority::Medium => self.medium,
            SyncPriority::Low => self.low,
        }
    }
}

impl Default for PriorityDelays {
    fn default() -> Self {
        Self {
            critical: Duration::ZERO,
            high: Duration::from_secs(5),
            medium: Duration::from_secs(30),
            low: Duration::from_secs(300),
        }
    }
}

/// Configuration for the record change queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum retries per change before it is dropped.
    pub max_retries: u32,
    /// Changes per batch; also the bound on in-flight operations.
    pub batch_size: usize,
    /// Scheduling delay per priority class.
    pub delays: PriorityDelays,
    /// Age past which pending changes and processed ids are evicted.
    pub retention: Duration,
    /// Interval between maintenance sweeps.
    pub sweep_interval: Duration,
    /// Whether enqueuing arms flush timers automatically.
    ///
    /// Left off during bulk data loads to suppress sync storms; an
    /// explicit [`force_flush_all`](crate::RecordChangeQueue::force_flush_all)
    /// still works either way.
    pub auto_flush: bool,
}

impl QueueConfig {
    /// Sets the maximum retries per change.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the per-priority delays.
    pub fn with_delays(mut self, delays: PriorityDelays) -> Self {
        self.delays = delays;
        self
    }

    /// Sets the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Enables or disables automatic flush scheduling.
    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            batch_size: 10,
            delays: PriorityDelays::default(),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            auto_flush: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(vec![TableSpec::new("athlete")])
            .with_max_table_attempts(5)
            .with_table_timeout(Duration::from_secs(10))
            .with_auto_sync(true);

        assert_eq!(config.tables.len(), 1);
        assert_eq!(config.max_table_attempts, 5);
        assert_eq!(config.table_timeout, Duration::from_secs(10));
        assert!(config.auto_sync);
        assert_eq!(
            config.missing_timestamp,
            MissingTimestampPolicy::AssumeFresh
        );
    }

    #[test]
    fn default_priority_delays() {
        let delays = PriorityDelays::default();
        assert_eq!(delays.delay_for(SyncPriority::Critical), Duration::ZERO);
        assert_eq!(delays.delay_for(SyncPriority::High), Duration::from_secs(5));
        assert_eq!(
            delays.delay_for(SyncPriority::Medium),
            Duration::from_secs(30)
        );
        assert_eq!(
            delays.delay_for(SyncPriority::Low),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert!(!config.auto_flush);
    }
}
