//! Local embedded store adapter.

use crate::error::{StoreError, StoreResult};
use crate::row::{Row, RowKey, TableSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Adapter over the local embedded row store.
///
/// The local side also exposes a coarse single-connection transaction
/// (`begin`/`commit`/`rollback`) used by the result writer to make one
/// logical domain event all-or-nothing.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns every row of `table`.
    async fn select_all(&self, spec: &TableSpec) -> StoreResult<Vec<Row>>;

    /// Returns the row of `table` with primary key `key`, if present.
    async fn get(&self, spec: &TableSpec, key: &RowKey) -> StoreResult<Option<Row>>;

    /// Inserts `row` into `table`, replacing any row with the same key.
    async fn upsert(&self, spec: &TableSpec, row: Row) -> StoreResult<()>;

    /// Begins a transaction.
    async fn begin(&self) -> StoreResult<()>;

    /// Commits the current transaction.
    async fn commit(&self) -> StoreResult<()>;

    /// Rolls back the current transaction, undoing writes since `begin`.
    async fn rollback(&self) -> StoreResult<()>;
}

type Tables = HashMap<String, BTreeMap<RowKey, Row>>;

/// An in-memory local store.
///
/// Transactions snapshot the whole table map on `begin`; `rollback`
/// restores the snapshot and `commit` discards it. Coarse, but it matches
/// the single-connection semantics the engine relies on.
#[derive(Default)]
pub struct MemoryLocalStore {
    inner: Mutex<MemoryLocalState>,
}

#[derive(Default)]
struct MemoryLocalState {
    tables: Tables,
    snapshot: Option<Tables>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `table` with `rows`, bypassing key checks in test setup.
    pub fn seed(&self, spec: &TableSpec, rows: Vec<Row>) {
        let mut state = self.inner.lock();
        let table = state.tables.entry(spec.name.clone()).or_default();
        for row in rows {
            if let Ok(key) = row.key(spec) {
                table.insert(key, row);
            }
        }
    }

    /// Returns the number of rows currently in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn select_all(&self, spec: &TableSpec) -> StoreResult<Vec<Row>> {
        let state = self.inner.lock();
        Ok(state
            .tables
            .get(&spec.name)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, spec: &TableSpec, key: &RowKey) -> StoreResult<Option<Row>> {
        let state = self.inner.lock();
        Ok(state
            .tables
            .get(&spec.name)
            .and_then(|table| table.get(key).cloned()))
    }

    async fn upsert(&self, spec: &TableSpec, row: Row) -> StoreResult<()> {
        let key = row.key(spec)?;
        let mut state = self.inner.lock();
        state
            .tables
            .entry(spec.name.clone())
            .or_default()
            .insert(key, row);
        Ok(())
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut state = self.inner.lock();
        let snapshot = state.tables.clone();
        state.snapshot = Some(snapshot);
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut state = self.inner.lock();
        state.snapshot.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut state = self.inner.lock();
        let snapshot = state.snapshot.take().ok_or(StoreError::NoTransaction)?;
        state.tables = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TableSpec {
        TableSpec::new("athlete")
    }

    fn row(id: &str, name: &str) -> Row {
        Row::new().with("id", id).with("name", name)
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let store = MemoryLocalStore::new();
        store.upsert(&spec(), row("a1", "Ada")).await.unwrap();

        let got = store
            .get(&spec(), &RowKey::single("a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.get_str("name"), Some("Ada"));

        store.upsert(&spec(), row("a1", "Grace")).await.unwrap();
        assert_eq!(store.row_count("athlete"), 1);
    }

    #[tokio::test]
    async fn rollback_restores_pre_transaction_state() {
        let store = MemoryLocalStore::new();
        store.upsert(&spec(), row("a1", "Ada")).await.unwrap();

        store.begin().await.unwrap();
        store.upsert(&spec(), row("a2", "Grace")).await.unwrap();
        store.upsert(&spec(), row("a3", "Edsger")).await.unwrap();
        store.rollback().await.unwrap();

        assert_eq!(store.row_count("athlete"), 1);
        assert!(store
            .get(&spec(), &RowKey::single("a2"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commit_keeps_writes() {
        let store = MemoryLocalStore::new();
        store.begin().await.unwrap();
        store.upsert(&spec(), row("a1", "Ada")).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.row_count("athlete"), 1);
    }

    #[tokio::test]
    async fn commit_without_begin_fails() {
        let store = MemoryLocalStore::new();
        assert!(matches!(
            store.commit().await,
            Err(StoreError::NoTransaction)
        ));
        assert!(matches!(
            store.rollback().await,
            Err(StoreError::NoTransaction)
        ));
    }
}
