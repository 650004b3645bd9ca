//! Connection scope: the seam between the record store and a backing engine.
//!
//! A scope hands out one handle per logical operation. The handle is
//! released by dropping it, so release happens on every exit path,
//! including errors and cancellation of the owning future.

use async_trait::async_trait;
use tenantry_core::{Record, Schema, StoreResult};

use crate::command::Command;

/// SQL dialect of the backing engine.
///
/// The store's logic is dialect-agnostic; only the "current time" and
/// "max of two" fragments and DDL column types differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Expression yielding the engine clock in milliseconds since the epoch.
    pub fn now_millis(&self) -> &'static str {
        match self {
            Dialect::Postgres => "(EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT",
            Dialect::Sqlite => "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)",
        }
    }

    /// Expression yielding the larger of two scalar expressions.
    pub fn greatest(&self, a: &str, b: &str) -> String {
        match self {
            Dialect::Postgres => format!("GREATEST({}, {})", a, b),
            Dialect::Sqlite => format!("MAX({}, {})", a, b),
        }
    }

    /// Positional parameter placeholder, 1-based.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
        }
    }

    /// Expression yielding the byte length of a text or binary column.
    pub fn byte_length(&self, column: &str) -> String {
        match self {
            Dialect::Postgres => format!("octet_length({})", column),
            Dialect::Sqlite => format!("length(CAST({} AS BLOB))", column),
        }
    }
}

/// Result of executing one command.
///
/// Write commands report the authoritative row as stored (including
/// engine-assigned `row_id`, `created` and `modified`) in `records`, so no
/// second round trip is needed to learn them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub rows_affected: u64,
    pub records: Vec<Record>,
    pub count: Option<i64>,
}

impl Outcome {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }

    pub fn with_records(rows_affected: u64, records: Vec<Record>) -> Self {
        Self {
            rows_affected,
            records,
            count: None,
        }
    }

    pub fn counted(count: i64) -> Self {
        Self {
            count: Some(count),
            ..Default::default()
        }
    }

    /// Take the single returned row, if any.
    pub fn into_single(self) -> Option<Record> {
        self.records.into_iter().next()
    }
}

/// Handle executing commands within one session boundary.
#[async_trait]
pub trait ScopeHandle: Send {
    /// Execute one command as a single statement round trip.
    ///
    /// Primary-key collisions must surface as
    /// `StoreError::UniquenessViolation`, distinct from other failures.
    async fn execute(&mut self, schema: &Schema, command: &Command<'_>) -> StoreResult<Outcome>;
}

/// Source of handles against a backing engine.
#[async_trait]
pub trait ConnectionScope: Send + Sync {
    type Handle: ScopeHandle;

    /// Acquire a handle. Dropping the handle releases it.
    async fn acquire(&self) -> StoreResult<Self::Handle>;

    fn dialect(&self) -> Dialect;
}
