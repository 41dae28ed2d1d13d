//! # rowsync store adapters
//!
//! Uniform read/write access to the local embedded row store and the
//! remote shared row store, keyed by table name and primary key.
//!
//! This crate provides:
//! - The opaque [`Row`] column map and [`RowKey`] primary-key identity
//! - [`TableSpec`] table declarations (name + primary-key columns)
//! - The [`LocalStore`] and [`RemoteStore`] adapter traits
//! - In-memory reference stores used by the engine's tests
//!
//! ## Key invariants
//!
//! - Primary-key columns are immutable row identifiers
//! - Every row carries a `last_changed` timestamp; `deleted_at` marks a
//!   soft delete
//! - Foreign-key violations surface as a structured
//!   [`StoreError::ForeignKeyViolation`], never as message text to match

mod error;
mod local;
mod remote;
mod row;

pub use error::{StoreError, StoreResult};
pub use local::{LocalStore, MemoryLocalStore};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use row::{Row, RowKey, TableSpec, DELETED_AT, LAST_CHANGED};
