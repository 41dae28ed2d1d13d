//! # rowsync engine
//!
//! Synchronization core for an offline-first application: reconciles a
//! local embedded row store with a remote shared store across
//! intermittent connectivity, under foreign-key ordering constraints.
//!
//! This crate provides:
//! - [`TableSyncEngine`]: full-table bidirectional reconciliation with
//!   last-writer-wins conflict resolution and dependency-aware retry
//! - [`RecordChangeQueue`]: a priority-scheduled queue of individual
//!   mutations with coalescing, batching, and bounded exponential-backoff
//!   retry
//! - [`ResultWriter`]: transactional multi-row local writes that feed the
//!   change queue on commit
//! - [`ConnectivityHandle`]: the online/offline signal the engine reacts to
//!
//! ## Architecture
//!
//! A full pass reconciles every configured table in declared dependency
//! order, pulling remote rows before pushing local ones. Tables that fail
//! on a foreign-key violation are retried after the rest, until a
//! fixpoint. Independently, committed local writes are queued per record
//! and pushed to the remote side on per-priority timers.
//!
//! ## Key invariants
//!
//! - At most one reconciliation pass and one queue flush run at a time
//! - At most one pending change per `(table, record id)`; the newest
//!   intent wins
//! - Remote-to-local propagation precedes local-to-remote within a table
//! - Ties on normalized timestamps keep the local row
//! - A queued delete is always a soft delete on the remote side

mod change;
mod config;
mod connectivity;
mod error;
mod queue;
mod stats;
mod table_sync;
mod timestamp;
mod writer;

pub use change::{ChangeId, Operation, RecordChange, SyncPriority};
pub use config::{MissingTimestampPolicy, PriorityDelays, QueueConfig, SyncConfig};
pub use connectivity::ConnectivityHandle;
pub use error::{SyncError, SyncResult};
pub use queue::{ChangeRequest, RecordChangeQueue};
pub use stats::{QueueStats, SyncStats, SyncStatus, TableFailure, TableStats};
pub use table_sync::TableSyncEngine;
pub use timestamp::{canonical, normalize};
pub use writer::{ResultWriter, WriteEvent};
