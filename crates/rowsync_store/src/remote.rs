//! Remote shared store adapter.

use crate::error::{StoreError, StoreResult};
use crate::row::{Row, RowKey, TableSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Adapter over the remote shared row store.
///
/// Write errors carry a machine-checkable kind: foreign-key violations
/// surface as [`StoreError::ForeignKeyViolation`] so the engine's
/// dependency-aware retry never has to match message text.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns every row of `table`.
    async fn select_all(&self, spec: &TableSpec) -> StoreResult<Vec<Row>>;

    /// Returns the row of `table` with primary key `key`, if present.
    async fn get(&self, spec: &TableSpec, key: &RowKey) -> StoreResult<Option<Row>>;

    /// Returns true if `table` holds a row with primary key `key`.
    async fn exists(&self, spec: &TableSpec, key: &RowKey) -> StoreResult<bool> {
        Ok(self.get(spec, key).await?.is_some())
    }

    /// Inserts `row` into `table`.
    async fn insert(&self, spec: &TableSpec, row: Row) -> StoreResult<()>;

    /// Replaces the row of `table` with primary key `key` by `row`.
    async fn update(&self, spec: &TableSpec, key: &RowKey, row: Row) -> StoreResult<()>;
}

/// A declared foreign-key edge enforced by [`MemoryRemoteStore`].
#[derive(Debug, Clone)]
struct ForeignKey {
    child_table: String,
    column: String,
    parent_table: String,
}

/// An in-memory remote store with constraint enforcement and fault
/// injection, for exercising the engine without a network.
///
/// Declared foreign keys are checked on insert and update, so reconciling
/// a child table before its parent fails the same way a real backend
/// would. Write failures and artificial latency can be injected per
/// table for retry and timeout tests.
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<MemoryRemoteState>,
}

#[derive(Default)]
struct MemoryRemoteState {
    tables: HashMap<String, BTreeMap<RowKey, Row>>,
    foreign_keys: Vec<ForeignKey>,
    failures: HashMap<String, (u32, StoreError)>,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `child_table.column` references `parent_table.id`.
    ///
    /// Inserts and updates into `child_table` with a non-null `column`
    /// value fail with a foreign-key violation until the referenced
    /// parent row exists.
    pub fn add_foreign_key(&self, child_table: &str, column: &str, parent_table: &str) {
        self.inner.lock().foreign_keys.push(ForeignKey {
            child_table: child_table.to_string(),
            column: column.to_string(),
            parent_table: parent_table.to_string(),
        });
    }

    /// Makes the next `count` writes to `table` fail with `error`.
    pub fn fail_next_writes(&self, table: &str, count: u32, error: StoreError) {
        self.inner
            .lock()
            .failures
            .insert(table.to_string(), (count, error));
    }

    /// Adds a fixed delay to every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    /// Seeds `table` with `rows` without constraint checks.
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

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_injected_failure(&self, table: &str) -> Option<StoreError> {
        let mut state = self.inner.lock();
        let (remaining, error) = state.failures.get_mut(table)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(error.clone())
    }

    fn check_foreign_keys(state: &MemoryRemoteState, table: &str, row: &Row) -> StoreResult<()> {
        for fk in state
            .foreign_keys
            .iter()
            .filter(|fk| fk.child_table == table)
        {
            let Some(value) = row.get(&fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let parent_key = match value.as_str() {
                Some(s) => RowKey::single(s),
                None => RowKey::single(value.to_string()),
            };
            let parent_exists = state
                .tables
                .get(&fk.parent_table)
                .is_some_and(|t| t.contains_key(&parent_key));
            if !parent_exists {
                return Err(StoreError::foreign_key(
                    table,
                    format!(
                        "column {} references missing {} row {}",
                        fk.column, fk.parent_table, parent_key
                    ),
                ));
            }
        }
        Ok(())
    }

    fn write(&self, spec: &TableSpec, key: RowKey, row: Row) -> StoreResult<()> {
        if let Some(error) = self.take_injected_failure(&spec.name) {
            return Err(error);
        }
        let mut state = self.inner.lock();
        Self::check_foreign_keys(&state, &spec.name, &row)?;
        state
            .tables
            .entry(spec.name.clone())
            .or_default()
            .insert(key, row);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn select_all(&self, spec: &TableSpec) -> StoreResult<Vec<Row>> {
        self.simulate_latency().await;
        let state = self.inner.lock();
        Ok(state
            .tables
            .get(&spec.name)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, spec: &TableSpec, key: &RowKey) -> StoreResult<Option<Row>> {
        self.simulate_latency().await;
        let state = self.inner.lock();
        Ok(state
            .tables
            .get(&spec.name)
            .and_then(|table| table.get(key).cloned()))
    }

    async fn insert(&self, spec: &TableSpec, row: Row) -> StoreResult<()> {
        self.simulate_latency().await;
        let key = row.key(spec)?;
        self.write(spec, key, row)
    }

    async fn update(&self, spec: &TableSpec, key: &RowKey, row: Row) -> StoreResult<()> {
        self.simulate_latency().await;
        self.write(spec, key.clone(), row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn athlete() -> TableSpec {
        TableSpec::new("athlete")
    }

    fn result() -> TableSpec {
        TableSpec::new("base_result")
    }

    #[tokio::test]
    async fn insert_then_exists() {
        let store = MemoryRemoteStore::new();
        let row = Row::new().with("id", "a1").with("name", "Ada");
        store.insert(&athlete(), row).await.unwrap();
        assert!(store
            .exists(&athlete(), &RowKey::single("a1"))
            .await
            .unwrap());
        assert!(!store
            .exists(&athlete(), &RowKey::single("a2"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn foreign_key_enforced_until_parent_exists() {
        let store = MemoryRemoteStore::new();
        store.add_foreign_key("base_result", "athlete_id", "athlete");

        let child = Row::new().with("id", "r1").with("athlete_id", "a1");
        let err = store.insert(&result(), child.clone()).await.unwrap_err();
        assert!(err.is_foreign_key_violation());

        store
            .insert(&athlete(), Row::new().with("id", "a1"))
            .await
            .unwrap();
        store.insert(&result(), child).await.unwrap();
    }

    #[tokio::test]
    async fn null_foreign_key_is_allowed() {
        let store = MemoryRemoteStore::new();
        store.add_foreign_key("base_result", "athlete_id", "athlete");

        let orphan = Row::new()
            .with("id", "r1")
            .with("athlete_id", serde_json::Value::Null);
        store.insert(&result(), orphan).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryRemoteStore::new();
        store.fail_next_writes("athlete", 2, StoreError::backend("boom"));

        let row = Row::new().with("id", "a1");
        assert!(store.insert(&athlete(), row.clone()).await.is_err());
        assert!(store.insert(&athlete(), row.clone()).await.is_err());
        store.insert(&athlete(), row).await.unwrap();
    }
}
