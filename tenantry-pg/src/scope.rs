//! Connection scope over a deadpool-postgres pool.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tenantry_core::{
    FieldKind, Record, RecordMeta, Schema, StorageError, StoreResult, TenantKey,
    Value, CREATED_COLUMN, MODIFIED_COLUMN, ROW_ID_COLUMN,
};
use tenantry_storage::{render, Command, ConnectionScope, Dialect, Outcome, Rendered, ScopeHandle};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::{classify, classify_pool};

// ============================================================================
// SCOPE
// ============================================================================

/// PostgreSQL engine. Each acquire checks one connection out of the pool.
#[derive(Clone)]
pub struct PgScope {
    pool: Pool,
}

impl std::fmt::Debug for PgScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgScope")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

impl PgScope {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> StoreResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Connections currently open, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

#[async_trait]
impl ConnectionScope for PgScope {
    type Handle = PgHandle;

    async fn acquire(&self) -> StoreResult<PgHandle> {
        let client = self.pool.get().await.map_err(classify_pool)?;
        Ok(PgHandle { client })
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// A pooled connection. Dropping it returns the connection to the pool.
pub struct PgHandle {
    client: Object,
}

#[async_trait]
impl ScopeHandle for PgHandle {
    async fn execute(&mut self, schema: &Schema, command: &Command<'_>) -> StoreResult<Outcome> {
        let table = schema.table();
        let rendered = render(schema, command, Dialect::Postgres);

        match command {
            Command::CreateTable => {
                self.client
                    .batch_execute(&rendered.sql)
                    .await
                    .map_err(|e| classify(table, e))?;
                Ok(Outcome::affected(0))
            }
            Command::CountDirty => {
                let rows = self.query(table, &rendered).await?;
                let count = rows
                    .first()
                    .map(|row| row.try_get::<_, i64>(0))
                    .transpose()
                    .map_err(|e| classify(table, e))?
                    .unwrap_or(0);
                Ok(Outcome::counted(count))
            }
            Command::Delete {
                returning: false, ..
            }
            | Command::PurgeTenant { .. } => {
                let affected = self.execute_rendered(table, &rendered).await?;
                Ok(Outcome::affected(affected))
            }
            Command::Select { .. } | Command::Page(_) => {
                let rows = self.query(table, &rendered).await?;
                Ok(Outcome::with_records(0, decode_rows(schema, &rows)?))
            }
            Command::Insert { .. } | Command::Update { .. } | Command::Delete { .. } => {
                let rows = self.query(table, &rendered).await?;
                let records = decode_rows(schema, &rows)?;
                Ok(Outcome::with_records(records.len() as u64, records))
            }
        }
    }
}

impl PgHandle {
    async fn query(&self, table: &str, rendered: &Rendered) -> StoreResult<Vec<Row>> {
        let statement = self
            .client
            .prepare_cached(&rendered.sql)
            .await
            .map_err(|e| classify(table, e))?;
        let params = bind(&rendered.params, statement.params());
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client
            .query(&statement, &refs)
            .await
            .map_err(|e| classify(table, e))
    }

    async fn execute_rendered(&self, table: &str, rendered: &Rendered) -> StoreResult<u64> {
        let statement = self
            .client
            .prepare_cached(&rendered.sql)
            .await
            .map_err(|e| classify(table, e))?;
        let params = bind(&rendered.params, statement.params());
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client
            .execute(&statement, &refs)
            .await
            .map_err(|e| classify(table, e))
    }
}

// ============================================================================
// PARAMETERS AND ROWS
// ============================================================================

type Param<'a> = Box<dyn ToSql + Sync + Send + 'a>;

/// Bind values using the parameter types the server inferred. `NULL`
/// takes the inferred type so it passes the driver's type check.
fn bind<'a>(values: &'a [Value], types: &[Type]) -> Vec<Param<'a>> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| -> Param<'a> {
            match value {
                Value::Null => typed_null(types.get(i)),
                Value::Bool(v) => Box::new(*v),
                Value::Int(v) | Value::Timestamp(v) => Box::new(*v),
                Value::Text(v) => Box::new(v.as_str()),
                Value::Bytes(v) => Box::new(v.as_slice()),
                Value::Uuid(v) => Box::new(*v),
            }
        })
        .collect()
}

fn typed_null<'a>(ty: Option<&Type>) -> Param<'a> {
    match ty {
        Some(ty) if *ty == Type::BOOL => Box::new(None::<bool>),
        Some(ty) if *ty == Type::INT8 => Box::new(None::<i64>),
        Some(ty) if *ty == Type::BYTEA => Box::new(None::<Vec<u8>>),
        Some(ty) if *ty == Type::UUID => Box::new(None::<Uuid>),
        _ => Box::new(None::<String>),
    }
}

fn decode_rows(schema: &Schema, rows: &[Row]) -> StoreResult<Vec<Record>> {
    rows.iter().map(|row| decode_row(schema, row)).collect()
}

fn decode_row(schema: &Schema, row: &Row) -> StoreResult<Record> {
    let table = schema.table();
    let read = |name: &str, kind: FieldKind| read_column(row, name, kind).map_err(|e| classify(table, e));

    let tenant = match read(schema.tenant_column(), FieldKind::Uuid)? {
        Value::Uuid(id) => TenantKey::new(id),
        _ => {
            return Err(StorageError::StatementFailed {
                table: table.to_string(),
                reason: "row without tenant".to_string(),
            }
            .into())
        }
    };
    let keys = schema
        .keys()
        .iter()
        .map(|def| read(&def.name, def.kind))
        .collect::<StoreResult<Vec<_>>>()?;
    let values = schema
        .values()
        .iter()
        .map(|def| read(&def.name, def.kind))
        .collect::<StoreResult<Vec<_>>>()?;

    let meta_column = |present: bool, name: &str| -> StoreResult<Option<i64>> {
        if !present {
            return Ok(None);
        }
        row.try_get::<_, Option<i64>>(name)
            .map_err(|e| classify(table, e))
    };
    let meta = RecordMeta {
        row_id: meta_column(schema.has_row_id(), ROW_ID_COLUMN)?,
        created: meta_column(schema.has_history(), CREATED_COLUMN)?,
        modified: meta_column(schema.has_history(), MODIFIED_COLUMN)?,
    };

    Ok(Record::new(tenant, keys, values).with_meta(meta))
}

fn read_column(row: &Row, name: &str, kind: FieldKind) -> Result<Value, tokio_postgres::Error> {
    let value = match kind {
        FieldKind::Bool => row.try_get::<_, Option<bool>>(name)?.map(Value::Bool),
        FieldKind::Int => row.try_get::<_, Option<i64>>(name)?.map(Value::Int),
        FieldKind::Text => row.try_get::<_, Option<String>>(name)?.map(Value::Text),
        FieldKind::Bytes => row.try_get::<_, Option<Vec<u8>>>(name)?.map(Value::Bytes),
        FieldKind::Uuid => row.try_get::<_, Option<Uuid>>(name)?.map(Value::Uuid),
        FieldKind::Timestamp => row.try_get::<_, Option<i64>>(name)?.map(Value::Timestamp),
    };
    Ok(value.unwrap_or(Value::Null))
}
