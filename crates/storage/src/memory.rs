//! In-memory reference backend.
//!
//! Tables hold integer-valued rows keyed by a 64-bit id. Each snapshot
//! buffers its writes and applies them at commit; reads made through a
//! snapshot see its own buffered writes, reads outside a snapshot see only
//! committed data. Row locks are held per snapshot and released when the
//! snapshot is committed, aborted or dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::conformance::{
    DISCOVERY_COLUMNS, DISCOVERY_TABLE, FIXTURE_IDS, ID_FIELD, OBJECT_TABLE,
};
use crate::error::StorageError;
use crate::record::{Row, StatusRow, STATUS_COLUMN};
use crate::statement::{delete_sql, lock_query_sql, Statement};
use crate::traits::LifecycleStorage;

/// How long a snapshot waits for a row lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Table {
    id_field: String,
    columns: BTreeSet<String>,
    rows: BTreeMap<u64, BTreeMap<String, i64>>,
}

impl Table {
    fn check_id_field(&self, table: &str, id_field: &str) -> Result<(), StorageError> {
        if self.id_field == id_field {
            Ok(())
        } else {
            Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: id_field.to_string(),
            })
        }
    }

    fn check_column(&self, table: &str, column: &str) -> Result<(), StorageError> {
        if self.columns.contains(column) {
            Ok(())
        } else {
            Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    /// (table, id) -> owning snapshot id
    locks: HashMap<(String, u64), u64>,
    log: Vec<String>,
    next_snapshot: u64,
    snapshots_begun: usize,
    commits: usize,
    rollbacks: usize,
    failing_tables: BTreeSet<String>,
}

impl State {
    fn table(&self, name: &str) -> Result<&Table, StorageError> {
        self.tables.get(name).ok_or_else(|| StorageError::UnknownTable {
            table: name.to_string(),
        })
    }

    fn check_writable(&self, table: &str) -> Result<(), StorageError> {
        if self.failing_tables.contains(table) {
            return Err(StorageError::Backend(format!(
                "injected write failure on {table}"
            )));
        }
        Ok(())
    }

    /// A row as seen by a snapshot with the given buffered writes.
    fn visible_row(&self, ops: &[Op], table: &str, id: u64) -> Option<BTreeMap<String, i64>> {
        let mut row = self.tables.get(table)?.rows.get(&id).cloned();
        for op in ops {
            match op {
                Op::Set {
                    table: t,
                    id: i,
                    column,
                    value,
                } if t == table && *i == id => {
                    if let Some(row) = row.as_mut() {
                        row.insert(column.clone(), *value);
                    }
                }
                Op::Delete { table: t, id: i } if t == table && *i == id => row = None,
                _ => {}
            }
        }
        row
    }
}

struct Shared {
    state: Mutex<State>,
    released: Notify,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory storage state poisoned".to_string()))
    }
}

#[derive(Debug, Clone)]
enum Op {
    Set {
        table: String,
        id: u64,
        column: String,
        value: i64,
    },
    Delete {
        table: String,
        id: u64,
    },
}

/// An open transaction against [`MemoryStorage`].
pub struct MemorySnapshot {
    id: u64,
    ops: Vec<Op>,
    sql: Vec<String>,
    committed: bool,
    shared: Arc<Shared>,
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        // Locks are released even if another holder panicked.
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = self.id;
        state.locks.retain(|_, owner| *owner != id);
        if !self.committed {
            state.rollbacks += 1;
        }
        drop(state);
        self.shared.released.notify_waiters();
    }
}

/// In-memory [`LifecycleStorage`] with real snapshot and row-lock semantics.
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        MemoryStorage {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                released: Notify::new(),
            }),
            lock_timeout,
        }
    }

    /// Storage seeded with the conformance fixture: an object table and a
    /// discovery-record table, both keyed by `objectid`, holding objects
    /// 1, 2 and 3 with every column 0.
    pub fn conformance_fixture() -> Result<Self, StorageError> {
        let storage = Self::new();
        storage.create_table(OBJECT_TABLE, ID_FIELD, &[STATUS_COLUMN])?;
        storage.create_table(DISCOVERY_TABLE, ID_FIELD, &DISCOVERY_COLUMNS)?;
        for id in FIXTURE_IDS {
            storage.insert_row(OBJECT_TABLE, Row::new(id))?;
            storage.insert_row(DISCOVERY_TABLE, Row::new(id))?;
        }
        Ok(storage)
    }

    /// Create an empty table.
    pub fn create_table(
        &self,
        name: &str,
        id_field: &str,
        columns: &[&str],
    ) -> Result<(), StorageError> {
        let mut state = self.shared.state()?;
        state.tables.insert(
            name.to_string(),
            Table {
                id_field: id_field.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Insert a committed row. Columns the row does not mention are set to 0.
    pub fn insert_row(&self, table: &str, row: Row) -> Result<(), StorageError> {
        let mut state = self.shared.state()?;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable {
                table: table.to_string(),
            })?;

        if t.rows.contains_key(&row.id) {
            return Err(StorageError::DuplicateRow {
                table: table.to_string(),
                id: row.id,
            });
        }

        let mut columns = BTreeMap::new();
        for column in &t.columns {
            columns.insert(column.clone(), row.get(column).unwrap_or(0));
        }
        for column in row.columns.keys() {
            t.check_column(table, column)?;
        }
        t.rows.insert(row.id, columns);
        Ok(())
    }

    /// Committed rows of a table, in id order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        let state = self.shared.state()?;
        Ok(state
            .table(table)?
            .rows
            .iter()
            .map(|(id, columns)| Row {
                id: *id,
                columns: columns.clone(),
            })
            .collect())
    }

    /// SQL of every committed snapshot, in commit order.
    pub fn statement_log(&self) -> Vec<String> {
        self.shared
            .state()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    pub fn snapshots_begun(&self) -> usize {
        self.shared.state().map(|s| s.snapshots_begun).unwrap_or(0)
    }

    pub fn commits(&self) -> usize {
        self.shared.state().map(|s| s.commits).unwrap_or(0)
    }

    /// Snapshots aborted or dropped without commit.
    pub fn rollbacks(&self) -> usize {
        self.shared.state().map(|s| s.rollbacks).unwrap_or(0)
    }

    /// Make every later write to `table` fail with a backend error.
    pub fn fail_writes_to(&self, table: &str) -> Result<(), StorageError> {
        self.shared.state()?.failing_tables.insert(table.to_string());
        Ok(())
    }

    /// Lock the existing rows among `ids` for `snapshot`, waiting for other
    /// snapshots to release them. Returns the visible rows that were locked.
    async fn acquire(
        &self,
        snapshot: &MemorySnapshot,
        table: &str,
        ids: &[u64],
    ) -> Result<Vec<(u64, BTreeMap<String, i64>)>, StorageError> {
        let deadline = tokio::time::Instant::now() + self.lock_timeout;

        loop {
            // Registered before checking so a release in between still wakes us.
            let released = self.shared.released.notified();

            let blocked_on = {
                let mut state = self.shared.state()?;
                state.table(table)?;

                let blocked_on = ids.iter().copied().find(|id| {
                    matches!(
                        state.locks.get(&(table.to_string(), *id)),
                        Some(owner) if *owner != snapshot.id
                    )
                });

                if blocked_on.is_none() {
                    let mut rows = Vec::with_capacity(ids.len());
                    for &id in ids {
                        if let Some(row) = state.visible_row(&snapshot.ops, table, id) {
                            state.locks.insert((table.to_string(), id), snapshot.id);
                            rows.push((id, row));
                        }
                    }
                    return Ok(rows);
                }
                blocked_on
            };

            if tokio::time::timeout_at(deadline, released).await.is_err() {
                let id = blocked_on.unwrap_or_default();
                debug!(table, id, "row lock wait timed out");
                return Err(StorageError::LockTimeout {
                    table: table.to_string(),
                    id,
                });
            }
        }
    }
}

#[async_trait]
impl LifecycleStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let mut state = self.shared.state()?;
        state.next_snapshot += 1;
        state.snapshots_begun += 1;
        Ok(MemorySnapshot {
            id: state.next_snapshot,
            ops: Vec::new(),
            sql: Vec::new(),
            committed: false,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn commit_snapshot(&self, mut snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let ops = std::mem::take(&mut snapshot.ops);
        let sql = std::mem::take(&mut snapshot.sql);
        {
            let mut state = self.shared.state()?;
            for op in ops {
                match op {
                    Op::Set {
                        table,
                        id,
                        column,
                        value,
                    } => {
                        if let Some(row) = state
                            .tables
                            .get_mut(&table)
                            .and_then(|t| t.rows.get_mut(&id))
                        {
                            row.insert(column, value);
                        }
                    }
                    Op::Delete { table, id } => {
                        if let Some(t) = state.tables.get_mut(&table) {
                            t.rows.remove(&id);
                        }
                    }
                }
            }
            state.log.extend(sql);
            state.commits += 1;
        }
        snapshot.committed = true;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    async fn lock_rows(
        &self,
        snapshot: &mut MemorySnapshot,
        table: &str,
        id_field: &str,
        ids: &[u64],
    ) -> Result<Vec<StatusRow>, StorageError> {
        {
            let state = self.shared.state()?;
            let t = state.table(table)?;
            t.check_id_field(table, id_field)?;
            t.check_column(table, STATUS_COLUMN)?;
        }

        let mut rows: Vec<StatusRow> = self
            .acquire(snapshot, table, ids)
            .await?
            .into_iter()
            .map(|(id, columns)| StatusRow {
                id,
                status: columns.get(STATUS_COLUMN).copied().unwrap_or(0),
            })
            .collect();
        rows.sort_by_key(|r| r.id);

        snapshot.sql.push(lock_query_sql(table, id_field, ids));
        Ok(rows)
    }

    async fn execute(
        &self,
        snapshot: &mut MemorySnapshot,
        statements: &[Statement],
    ) -> Result<(), StorageError> {
        for statement in statements {
            let table = statement.table();
            {
                let state = self.shared.state()?;
                state.check_writable(table)?;
                let t = state.table(table)?;
                match statement {
                    Statement::SetColumns {
                        id_field,
                        assignments,
                        ..
                    } => {
                        t.check_id_field(table, id_field)?;
                        for a in assignments {
                            t.check_column(table, &a.column)?;
                        }
                    }
                    Statement::SetColumnForIds {
                        id_field, column, ..
                    } => {
                        t.check_id_field(table, id_field)?;
                        t.check_column(table, column)?;
                    }
                }
            }

            let locked = self.acquire(snapshot, table, statement.ids()).await?;
            for (id, _) in locked {
                match statement {
                    Statement::SetColumns { assignments, .. } => {
                        for a in assignments {
                            snapshot.ops.push(Op::Set {
                                table: table.to_string(),
                                id,
                                column: a.column.clone(),
                                value: a.value,
                            });
                        }
                    }
                    Statement::SetColumnForIds { column, value, .. } => {
                        snapshot.ops.push(Op::Set {
                            table: table.to_string(),
                            id,
                            column: column.clone(),
                            value: *value,
                        });
                    }
                }
            }
            snapshot.sql.push(statement.to_sql());
        }
        Ok(())
    }

    async fn delete_rows(
        &self,
        snapshot: &mut MemorySnapshot,
        table: &str,
        id_field: &str,
        ids: &[u64],
    ) -> Result<usize, StorageError> {
        {
            let state = self.shared.state()?;
            state.check_writable(table)?;
            state.table(table)?.check_id_field(table, id_field)?;
        }

        let locked = self.acquire(snapshot, table, ids).await?;
        let removed = locked.len();
        for (id, _) in locked {
            snapshot.ops.push(Op::Delete {
                table: table.to_string(),
                id,
            });
        }
        snapshot.sql.push(delete_sql(table, id_field, ids));
        Ok(removed)
    }

    async fn read_row(&self, table: &str, id: u64) -> Result<Option<Row>, StorageError> {
        let state = self.shared.state()?;
        Ok(state.table(table)?.rows.get(&id).map(|columns| Row {
            id,
            columns: columns.clone(),
        }))
    }
}
