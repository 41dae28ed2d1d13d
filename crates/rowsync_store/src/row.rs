//! Row and table declarations.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column name holding the last-writer-wins timestamp.
pub const LAST_CHANGED: &str = "last_changed";

/// Column name holding the soft-delete marker.
pub const DELETED_AT: &str = "deleted_at";

/// A table declaration: name plus primary-key column(s).
///
/// The position of a spec in the configured table list is its dependency
/// rank: tables referencing another table's rows via foreign key must be
/// declared after it. The engine does not compute ranks; it discovers
/// ordering failures at runtime and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Primary-key column names (one or more, composite keys supported).
    pub primary_key: Vec<String>,
}

impl TableSpec {
    /// Creates a table spec with a single `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_key(name, &["id"])
    }

    /// Creates a table spec with explicit primary-key columns.
    pub fn with_key(name: impl Into<String>, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// The identity of a row: its stringified primary-key values.
///
/// Composite keys keep their column order from the [`TableSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Vec<String>);

impl RowKey {
    /// Builds a key from a single value, the common single-column case.
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    /// Builds a composite key from values in declaration order.
    pub fn composite(values: &[&str]) -> Self {
        Self(values.iter().map(|v| (*v).to_string()).collect())
    }

    /// Rebuilds a key from its display form per `spec`.
    ///
    /// Single-column keys are taken whole, so an id containing the
    /// separator still round-trips. Composite keys are split on the
    /// separator and the part count must match the declared columns.
    pub fn parse(display: &str, spec: &TableSpec) -> StoreResult<Self> {
        if spec.primary_key.len() == 1 {
            return Ok(Self::single(display));
        }
        let parts: Vec<String> = display.split('|').map(str::to_string).collect();
        if parts.len() != spec.primary_key.len() {
            return Err(StoreError::MalformedKey {
                table: spec.name.clone(),
                key: display.to_string(),
            });
        }
        Ok(Self(parts))
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

/// An opaque row: a mapping of column name to JSON value.
///
/// Rows always carry a `last_changed` ISO-8601 timestamp and may carry a
/// nullable `deleted_at` soft-delete marker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Returns the value of `column` as a string, if present and textual.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    /// Sets `column` to `value`, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    /// Builder-style [`Row::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Returns the raw `last_changed` value, if present and non-null.
    pub fn last_changed(&self) -> Option<&str> {
        self.get_str(LAST_CHANGED)
    }

    /// Returns the soft-delete timestamp, if the row is deleted.
    pub fn deleted_at(&self) -> Option<&str> {
        self.get_str(DELETED_AT)
    }

    /// Returns true if the row carries a non-null soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    /// Extracts the row's primary-key identity per `spec`.
    ///
    /// Key values are stringified so numeric and textual backends index
    /// identically. Fails if any key column is absent or null.
    pub fn key(&self, spec: &TableSpec) -> StoreResult<RowKey> {
        let mut values = Vec::with_capacity(spec.primary_key.len());
        for column in &spec.primary_key {
            let value = self.0.get(column).filter(|v| !v.is_null()).ok_or_else(|| {
                StoreError::MissingKeyColumn {
                    table: spec.name.clone(),
                    column: column.clone(),
                }
            })?;
            values.push(stringify(value));
        }
        Ok(RowKey(values))
    }

    /// Iterates over all columns.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merges every non-key column of `other` into this row.
    ///
    /// Used when the other side wins a conflict: primary-key columns are
    /// immutable identifiers and are kept as-is.
    pub fn overwrite_from(&mut self, other: &Row, spec: &TableSpec) {
        for (column, value) in &other.0 {
            if spec.primary_key.iter().any(|pk| pk == column) {
                continue;
            }
            self.0.insert(column.clone(), value.clone());
        }
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
