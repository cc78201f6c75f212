use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreOp, StoreResult};
use crate::filter::{Filter, Join, Row};
use crate::traits::RecordStore;

/// Primary key column assumed for tables that were never defined.
const DEFAULT_PRIMARY_KEY: &str = "id";

#[derive(Clone, Debug, Default)]
struct Table {
    primary_key: String,
    rows: Vec<Row>,
}

impl Table {
    fn with_key(primary_key: &str) -> Self {
        Self {
            primary_key: primary_key.to_string(),
            rows: Vec::new(),
        }
    }
}

/// An injected failure for one (table, operation) pair.
#[derive(Clone, Debug)]
struct Fault {
    table: String,
    op: StoreOp,
    /// `None` fails forever; `Some(n)` fails the next `n` calls.
    remaining: Option<u32>,
}

/// Serialized form of an in-memory store, used for JSON fixtures.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub tables: BTreeMap<String, FixtureTable>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureTable {
    pub primary_key: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// In-memory, HashMap-based record store.
///
/// Intended for tests, fixtures, and the operator CLI. Tables keep rows in
/// insertion order behind a `RwLock`. Tables spring into existence on first
/// insert; selecting from an unknown table yields no rows.
///
/// Faults can be injected per (table, operation) to simulate backend
/// rejections.
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Table>>,
    faults: RwLock<Vec<Fault>>,
    writes: AtomicU64,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            faults: RwLock::new(Vec::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Declare `table` with the given primary key column. Existing rows are
    /// kept.
    pub fn define_table(&self, table: &str, primary_key: &str) {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables
            .entry(table.to_string())
            .and_modify(|t| t.primary_key = primary_key.to_string())
            .or_insert_with(|| Table::with_key(primary_key));
    }

    /// Insert a row synchronously (test and fixture setup).
    pub fn seed(&self, table: &str, row: Value) -> StoreResult<Row> {
        let row = match row {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Serialization(format!(
                    "seed row for {table} must be an object, got {other}"
                )))
            }
        };
        let mut tables = self.write_tables()?;
        insert_row(&mut tables, table, row)
    }

    /// A copy of every row in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().expect("lock poisoned");
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Number of rows in `table` matching `filter`.
    pub fn count(&self, table: &str, filter: &Filter) -> usize {
        let tables = self.tables.read().expect("lock poisoned");
        tables
            .get(table)
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).count())
            .unwrap_or(0)
    }

    /// Names of all known tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let tables = self.tables.read().expect("lock poisoned");
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of successful insert/update/delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every `op` on `table` fail until faults are cleared.
    pub fn fail_on(&self, table: &str, op: StoreOp) {
        self.push_fault(table, op, None);
    }

    /// Make the next `op` on `table` fail once.
    pub fn fail_once(&self, table: &str, op: StoreOp) {
        self.push_fault(table, op, Some(1));
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.write().expect("lock poisoned").clear();
    }

    /// Build a store from a fixture.
    pub fn from_fixture(fixture: Fixture) -> StoreResult<Self> {
        let store = Self::new();
        {
            let mut tables = store.write_tables()?;
            for (name, table) in fixture.tables {
                tables.insert(name.clone(), Table::with_key(&table.primary_key));
                for row in table.rows {
                    insert_row(&mut tables, &name, row)?;
                }
            }
        }
        Ok(store)
    }

    /// Snapshot the store as a fixture (tables sorted by name).
    pub fn to_fixture(&self) -> StoreResult<Fixture> {
        let tables = self.read_tables()?;
        let tables = tables
            .iter()
            .map(|(name, t)| {
                (
                    name.clone(),
                    FixtureTable {
                        primary_key: t.primary_key.clone(),
                        rows: t.rows.clone(),
                    },
                )
            })
            .collect();
        Ok(Fixture { tables })
    }

    /// Load a JSON fixture file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let bytes = std::fs::read(path)?;
        let fixture: Fixture = serde_json::from_slice(&bytes)?;
        debug!(path = %path.display(), tables = fixture.tables.len(), "fixture loaded");
        Self::from_fixture(fixture)
    }

    /// Write the store to a pretty-printed JSON fixture file.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.to_fixture()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn push_fault(&self, table: &str, op: StoreOp, remaining: Option<u32>) {
        self.faults.write().expect("lock poisoned").push(Fault {
            table: table.to_string(),
            op,
            remaining,
        });
    }

    /// Consume a matching fault, if one is armed.
    fn check_fault(&self, table: &str, op: StoreOp) -> StoreResult<()> {
        let mut faults = self
            .faults
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        let Some(pos) = faults.iter().position(|f| f.table == table && f.op == op) else {
            return Ok(());
        };
        if let Some(remaining) = faults[pos].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(pos);
            }
        }
        Err(StoreError::rejected(table, op, "injected fault"))
    }

    fn read_tables(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write_tables(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_row(tables: &mut HashMap<String, Table>, table: &str, mut row: Row) -> StoreResult<Row> {
    let entry = tables
        .entry(table.to_string())
        .or_insert_with(|| Table::with_key(DEFAULT_PRIMARY_KEY));
    let pk = entry.primary_key.clone();
    match row.get(&pk) {
        None | Some(Value::Null) => {
            row.insert(pk, Value::String(uuid::Uuid::now_v7().to_string()));
        }
        Some(key) => {
            if entry.rows.iter().any(|r| r.get(&pk) == Some(key)) {
                return Err(StoreError::Constraint {
                    table: table.to_string(),
                    reason: format!("duplicate {pk} {key}"),
                });
            }
        }
    }
    entry.rows.push(row.clone());
    Ok(row)
}

fn apply_joins(tables: &HashMap<String, Table>, mut row: Row, joins: &[Join]) -> Row {
    for join in joins {
        let joined = row
            .get(&join.local_column)
            .filter(|v| !v.is_null())
            .and_then(|key| {
                tables.get(&join.table).and_then(|t| {
                    t.rows
                        .iter()
                        .find(|r| r.get(&join.foreign_column) == Some(key))
                })
            })
            .cloned()
            .map(Value::Object)
            .unwrap_or(Value::Null);
        row.insert(join.alias.clone(), joined);
    }
    row
}

fn require_filter(table: &str, op: StoreOp, filter: &Filter) -> StoreResult<()> {
    if filter.is_empty() {
        return Err(StoreError::UnfilteredWrite {
            table: table.to_string(),
            op,
        });
    }
    Ok(())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn select(&self, table: &str, filter: &Filter, joins: &[Join]) -> StoreResult<Vec<Row>> {
        self.check_fault(table, StoreOp::Select)?;
        let tables = self.read_tables()?;
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.rows
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| apply_joins(&tables, r.clone(), joins))
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> StoreResult<Row> {
        self.check_fault(table, StoreOp::Insert)?;
        let stored = {
            let mut tables = self.write_tables()?;
            insert_row(&mut tables, table, row)?
        };
        self.record_write();
        debug!(table, "row inserted");
        Ok(stored)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: &Row) -> StoreResult<u64> {
        require_filter(table, StoreOp::Update, filter)?;
        self.check_fault(table, StoreOp::Update)?;
        let affected = {
            let mut tables = self.write_tables()?;
            let mut affected = 0u64;
            if let Some(t) = tables.get_mut(table) {
                for row in t.rows.iter_mut().filter(|r| filter.matches(r)) {
                    for (column, value) in patch {
                        row.insert(column.clone(), value.clone());
                    }
                    affected += 1;
                }
            }
            affected
        };
        self.record_write();
        debug!(table, %filter, affected, "rows updated");
        Ok(affected)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> StoreResult<u64> {
        require_filter(table, StoreOp::Delete, filter)?;
        self.check_fault(table, StoreOp::Delete)?;
        let removed = {
            let mut tables = self.write_tables()?;
            match tables.get_mut(table) {
                Some(t) => {
                    let before = t.rows.len();
                    t.rows.retain(|r| !filter.matches(r));
                    (before - t.rows.len()) as u64
                }
                None => 0,
            }
        };
        self.record_write();
        debug!(table, %filter, removed, "rows deleted");
        Ok(removed)
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("tables", &self.table_names())
            .field("writes", &self.write_count())
            .finish()
    }
}
