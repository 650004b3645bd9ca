//! Structured commands sent through a connection scope.
//!
//! Engines either interpret a [`Command`] directly or render it to SQL with
//! [`crate::sql::render`]. Every command is parameterized over one schema
//! and, except for table-wide ones, one tenant key.

use serde::{Deserialize, Serialize};
use tenantry_core::{FieldRole, PageOrder, Record, Schema, StoreError, StoreResult, TenantKey, Value};

use crate::pagination::Cursor;

/// What an insert does when the composite key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnConflict {
    /// Fail the statement with a uniqueness violation.
    Fail,
    /// Leave the existing row alone and report zero rows.
    Ignore,
    /// Rewrite the value fields and advance `modified` monotonically.
    UpdateValues,
}

/// Comparison operator of a page filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// One condition on a key or value field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Conjunction of field conditions applied within one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageFilter {
    pub conditions: Vec<FieldFilter>,
}

impl PageFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, condition: FieldFilter) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(FieldFilter::new(field, FilterOp::Eq, value))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Check every condition refers to a known field with a usable operand.
    ///
    /// `NULL` only works with `Eq`/`Ne`, which render as `IS [NOT] NULL`.
    pub fn check(&self, schema: &Schema) -> StoreResult<()> {
        for condition in &self.conditions {
            let (_, def) = schema.field(&condition.field).ok_or_else(|| {
                StoreError::contract(format!(
                    "filter on unknown field '{}' of {}",
                    condition.field,
                    schema.table()
                ))
            })?;
            if condition.value.is_null() {
                if !matches!(condition.op, FilterOp::Eq | FilterOp::Ne) {
                    return Err(StoreError::contract(format!(
                        "filter on '{}' compares NULL with {:?}",
                        condition.field, condition.op
                    )));
                }
            } else if !condition.value.matches_kind(def.kind) {
                return Err(StoreError::contract(format!(
                    "filter on '{}' expects a {} operand",
                    condition.field,
                    def.kind.name()
                )));
            }
        }
        Ok(())
    }

    /// Evaluate against a record with SQL semantics: a comparison against a
    /// NULL column is never true.
    pub fn matches(&self, schema: &Schema, record: &Record) -> bool {
        self.conditions.iter().all(|condition| {
            let column = match schema.field(&condition.field) {
                Some((FieldRole::Key(i), _)) => record.keys.get(i),
                Some((FieldRole::Value(i), _)) => record.values.get(i),
                None => None,
            };
            let Some(column) = column else {
                return false;
            };

            if condition.value.is_null() {
                return match condition.op {
                    FilterOp::Eq => column.is_null(),
                    FilterOp::Ne => !column.is_null(),
                    _ => false,
                };
            }
            if column.is_null() {
                return false;
            }

            match column.compare(&condition.value) {
                Some(ord) => match condition.op {
                    FilterOp::Eq => ord.is_eq(),
                    FilterOp::Ne => ord.is_ne(),
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Lt => ord.is_lt(),
                    FilterOp::Gte => ord.is_ge(),
                    FilterOp::Lte => ord.is_le(),
                },
                None => false,
            }
        })
    }
}

/// One keyset page request as sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery<'a> {
    pub tenant: TenantKey,
    pub filter: &'a PageFilter,
    pub order: PageOrder,
    /// Strict lower (ascending) or upper (descending) bound.
    pub after: Option<Cursor>,
    /// Number of rows to fetch, already including the look-ahead row.
    pub fetch: i64,
}

/// A single statement against one tenant-scoped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Create the table and its pagination index if absent.
    CreateTable,
    Insert {
        record: &'a Record,
        conflict: OnConflict,
    },
    /// Rewrite the value fields of an existing row.
    Update { record: &'a Record },
    Delete {
        tenant: TenantKey,
        keys: &'a [Value],
        /// Return the deleted row in the same statement.
        returning: bool,
    },
    Select {
        tenant: TenantKey,
        keys: &'a [Value],
    },
    Page(PageQuery<'a>),
    /// Table-wide row count without transactional guarantees.
    CountDirty,
    /// Delete every row of one tenant.
    PurgeTenant { tenant: TenantKey },
}

impl Command<'_> {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateTable => "create_table",
            Command::Insert {
                conflict: OnConflict::Fail,
                ..
            } => "insert",
            Command::Insert {
                conflict: OnConflict::Ignore,
                ..
            } => "try_insert",
            Command::Insert {
                conflict: OnConflict::UpdateValues,
                ..
            } => "upsert",
            Command::Update { .. } => "update",
            Command::Delete {
                returning: false, ..
            } => "delete",
            Command::Delete { returning: true, .. } => "pop",
            Command::Select { .. } => "select",
            Command::Page(_) => "page",
            Command::CountDirty => "count_dirty",
            Command::PurgeTenant { .. } => "purge_tenant",
        }
    }
}
