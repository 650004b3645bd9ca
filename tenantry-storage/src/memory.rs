//! In-memory engine for tests and single-process use.
//!
//! Interprets [`Command`]s directly with the same observable semantics as
//! the rendered SQL: composite primary keys, a row sequence assigned on
//! first insert, one clock reading per statement, and the monotonic
//! `modified` rule on conflict and update. Each statement runs under one
//! lock, which makes every command atomic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tenantry_core::{
    validate_record, Clock, PageOrder, Record, RecordMeta, Schema, StorageError, StoreError,
    StoreResult, SystemClock, TenantKey, Timestamp, Value,
};

use crate::cache::key::encode_values;
use crate::command::{Command, OnConflict, PageQuery};
use crate::scope::{ConnectionScope, Dialect, Outcome, ScopeHandle};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<Vec<u8>, Record>,
    next_row_id: i64,
}

impl MemoryTable {
    fn assign_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }
}

struct MemoryInner {
    tables: Mutex<HashMap<String, MemoryTable>>,
    clock: Arc<dyn Clock>,
    dialect: Dialect,
    round_trips: AtomicU64,
    open_handles: AtomicUsize,
    fail_next: Mutex<Option<StoreError>>,
}

/// Connection scope over process memory. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryScope {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryScope")
            .field("dialect", &self.inner.dialect)
            .field("round_trips", &self.round_trips())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

impl Default for MemoryScope {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Engine reading time from `clock`, e.g. a frozen
    /// [`ManualClock`](tenantry_core::ManualClock).
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: Mutex::new(HashMap::new()),
                clock: Arc::new(clock),
                dialect: Dialect::Postgres,
                round_trips: AtomicU64::new(0),
                open_handles: AtomicUsize::new(0),
                fail_next: Mutex::new(None),
            }),
        }
    }

    /// Number of statements executed so far.
    pub fn round_trips(&self) -> u64 {
        self.inner.round_trips.load(Ordering::SeqCst)
    }

    /// Number of handles acquired and not yet dropped.
    pub fn open_handles(&self) -> usize {
        self.inner.open_handles.load(Ordering::SeqCst)
    }

    /// Make the next statement fail with `err` without touching any table.
    pub fn fail_next(&self, err: StoreError) {
        let mut slot = self
            .inner
            .fail_next
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(err);
    }
}

#[async_trait]
impl ConnectionScope for MemoryScope {
    type Handle = MemoryHandle;

    async fn acquire(&self) -> StoreResult<MemoryHandle> {
        self.inner.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryHandle {
            inner: Arc::clone(&self.inner),
        })
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect
    }
}

/// Handle of a [`MemoryScope`]. Released on drop.
pub struct MemoryHandle {
    inner: Arc<MemoryInner>,
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.inner.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScopeHandle for MemoryHandle {
    async fn execute(&mut self, schema: &Schema, command: &Command<'_>) -> StoreResult<Outcome> {
        self.inner.round_trips.fetch_add(1, Ordering::SeqCst);
        // Let other tasks interleave between statements as they would
        // against a real engine.
        tokio::task::yield_now().await;
        self.inner.apply(schema, command)
    }
}

impl MemoryInner {
    fn tables(&self) -> StoreResult<MutexGuard<'_, HashMap<String, MemoryTable>>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::from(StorageError::LockPoisoned))
    }

    fn take_failure(&self) -> Option<StoreError> {
        self.fail_next
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn apply(&self, schema: &Schema, command: &Command<'_>) -> StoreResult<Outcome> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut tables = self.tables()?;
        if let Command::CreateTable = command {
            tables.entry(schema.table().to_string()).or_default();
            return Ok(Outcome::affected(0));
        }

        let table = tables
            .get_mut(schema.table())
            .ok_or_else(|| StorageError::UnknownTable {
                table: schema.table().to_string(),
            })?;
        let now = self.clock.now_millis();

        match command {
            Command::CreateTable => Ok(Outcome::affected(0)),
            Command::Insert { record, conflict } => insert(schema, table, record, *conflict, now),
            Command::Update { record } => update(schema, table, record, now),
            Command::Delete {
                tenant,
                keys,
                returning,
            } => {
                let removed = table.rows.remove(&primary_key(*tenant, keys));
                match (removed, *returning) {
                    (Some(row), true) => Ok(Outcome::with_records(1, vec![row])),
                    (Some(_), false) => Ok(Outcome::affected(1)),
                    (None, _) => Ok(Outcome::affected(0)),
                }
            }
            Command::Select { tenant, keys } => {
                let found = table.rows.get(&primary_key(*tenant, keys)).cloned();
                Ok(Outcome::with_records(0, found.into_iter().collect()))
            }
            Command::Page(query) => Ok(page(schema, table, query)),
            Command::CountDirty => Ok(Outcome::counted(table.rows.len() as i64)),
            Command::PurgeTenant { tenant } => {
                let before = table.rows.len();
                table.rows.retain(|_, row| row.tenant != *tenant);
                Ok(Outcome::affected((before - table.rows.len()) as u64))
            }
        }
    }
}

fn primary_key(tenant: TenantKey, keys: &[Value]) -> Vec<u8> {
    let mut pk = tenant.as_bytes().to_vec();
    encode_values(&mut pk, keys);
    pk
}

/// Declared bounds act as the engine's CHECK constraints.
fn check_constraints(schema: &Schema, record: &Record) -> StoreResult<()> {
    validate_record(schema, record).map_err(|err| {
        StoreError::from(StorageError::ConstraintViolation {
            table: schema.table().to_string(),
            reason: err.to_string(),
        })
    })
}

fn insert(
    schema: &Schema,
    table: &mut MemoryTable,
    record: &Record,
    conflict: OnConflict,
    now: Timestamp,
) -> StoreResult<Outcome> {
    check_constraints(schema, record)?;
    let pk = primary_key(record.tenant, &record.keys);

    if let Some(existing) = table.rows.get_mut(&pk) {
        return match conflict {
            OnConflict::Fail => Err(StorageError::UniqueViolation {
                table: schema.table().to_string(),
                key: describe_key(record),
            }
            .into()),
            OnConflict::Ignore => Ok(Outcome::affected(0)),
            OnConflict::UpdateValues => {
                existing.values = record.values.clone();
                advance_modified(schema, existing, now);
                Ok(Outcome::with_records(1, vec![existing.clone()]))
            }
        };
    }

    let meta = RecordMeta {
        row_id: schema.has_row_id().then(|| table.assign_row_id()),
        created: schema.has_history().then_some(now),
        modified: schema.has_history().then_some(now),
    };
    let row = Record::new(record.tenant, record.keys.clone(), record.values.clone()).with_meta(meta);
    table.rows.insert(pk, row.clone());
    Ok(Outcome::with_records(1, vec![row]))
}

fn update(
    schema: &Schema,
    table: &mut MemoryTable,
    record: &Record,
    now: Timestamp,
) -> StoreResult<Outcome> {
    check_constraints(schema, record)?;
    match table.rows.get_mut(&primary_key(record.tenant, &record.keys)) {
        Some(existing) => {
            existing.values = record.values.clone();
            advance_modified(schema, existing, now);
            Ok(Outcome::with_records(1, vec![existing.clone()]))
        }
        None => Ok(Outcome::affected(0)),
    }
}

/// `modified = max(modified + 1, now)`.
fn advance_modified(schema: &Schema, row: &mut Record, now: Timestamp) {
    if schema.has_history() {
        row.meta.modified = Some(match row.meta.modified {
            Some(previous) => previous.saturating_add(1).max(now),
            None => now,
        });
    }
}

fn page(schema: &Schema, table: &MemoryTable, query: &PageQuery<'_>) -> Outcome {
    let mut rows: Vec<&Record> = table
        .rows
        .values()
        .filter(|row| row.tenant == query.tenant)
        .filter(|row| query.filter.matches(schema, row))
        .filter(|row| match &query.after {
            Some(cursor) => cursor.admits(query.order, row),
            None => true,
        })
        .collect();

    let row_id = |r: &Record| r.row_id().unwrap_or(i64::MIN);
    match query.order {
        PageOrder::RowIdAsc => rows.sort_by_key(|r| row_id(*r)),
        PageOrder::CreatedDesc => {
            rows.sort_by_key(|r| Reverse((r.created().unwrap_or(i64::MIN), row_id(*r))))
        }
        PageOrder::ModifiedDesc => {
            rows.sort_by_key(|r| Reverse((r.modified().unwrap_or(i64::MIN), row_id(*r))))
        }
    }

    let fetch = usize::try_from(query.fetch).unwrap_or(0);
    let records: Vec<Record> = rows.into_iter().take(fetch).cloned().collect();
    Outcome::with_records(0, records)
}

fn describe_key(record: &Record) -> String {
    let keys: Vec<String> = record.keys.iter().map(|v| v.to_string()).collect();
    format!("({}, {})", record.tenant, keys.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{FieldDef, ManualClock};

    fn counter() -> Schema {
        Schema::builder("counter")
            .key(FieldDef::text("name").len(1, 16))
            .value(FieldDef::int("hits"))
            .history()
            .row_id()
            .build()
            .expect("valid schema")
    }

    fn row(tenant: TenantKey, name: &str, hits: i64) -> Record {
        Record::new(tenant, vec![Value::from(name)], vec![Value::Int(hits)])
    }

    async fn exec(scope: &MemoryScope, schema: &Schema, command: Command<'_>) -> StoreResult<Outcome> {
        let mut handle = scope.acquire().await?;
        handle.execute(schema, &command).await
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let scope = MemoryScope::new();
        let err = exec(&scope, &counter(), Command::CountDirty).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Storage(StorageError::UnknownTable { .. })
        ));
    }

    #[tokio::test]
    async fn test_upsert_within_one_tick_advances_modified() {
        let clock = ManualClock::new(1_000);
        let scope = MemoryScope::with_clock(clock.clone());
        let schema = counter();
        let tenant = TenantKey::generate();
        exec(&scope, &schema, Command::CreateTable).await.expect("create");

        let mut last = None;
        for hits in 0..5 {
            let r = row(tenant, "a", hits);
            let out = exec(&scope, &schema, Command::Insert {
                record: &r,
                conflict: OnConflict::UpdateValues,
            })
            .await
            .expect("upsert");
            let stored = out.into_single().expect("row returned");
            assert_eq!(stored.created(), Some(1_000));
            assert_eq!(stored.row_id(), Some(1));
            if let Some(previous) = last {
                assert!(stored.modified() > Some(previous));
            }
            last = stored.modified();
        }
        assert_eq!(last, Some(1_004));

        clock.set(5_000);
        let r = row(tenant, "a", 9);
        let out = exec(&scope, &schema, Command::Update { record: &r })
            .await
            .expect("update");
        assert_eq!(out.into_single().and_then(|r| r.modified()), Some(5_000));
    }

    #[tokio::test]
    async fn test_constraint_violation() {
        let scope = MemoryScope::new();
        let schema = counter();
        exec(&scope, &schema, Command::CreateTable).await.expect("create");
        let r = Record::new(TenantKey::generate(), vec![Value::from("a")], vec![Value::Null]);
        let err = exec(&scope, &schema, Command::Insert {
            record: &r,
            conflict: OnConflict::Fail,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { .. }));
    }

    #[tokio::test]
    async fn test_fail_next_and_handle_release() {
        let scope = MemoryScope::new();
        scope.fail_next(StoreError::Transient {
            reason: "injected".to_string(),
        });
        let err = exec(&scope, &counter(), Command::CreateTable).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(scope.open_handles(), 0);
        assert_eq!(scope.round_trips(), 1);

        exec(&scope, &counter(), Command::CreateTable).await.expect("create");
    }
}
