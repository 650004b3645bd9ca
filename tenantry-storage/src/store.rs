//! Record store: tenant-scoped CRUD over one schema.
//!
//! Every operation validates its input before any I/O, runs exactly one
//! statement through a freshly acquired scope handle, and updates the
//! read-through cache only after that statement has completed.

use std::sync::Arc;

use tenantry_core::{
    validate_key, validate_record, validate_tenant, Record, RecordMeta, Schema, StorageError,
    StoreConfig, StoreError, StoreResult, TenantKey, Value,
};

use crate::cache::{CacheKey, CacheRead, ReadThroughCache};
use crate::command::{Command, OnConflict};
use crate::scope::{ConnectionScope, Outcome, ScopeHandle};

/// Result of a single-row write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_affected: u64,
    /// The row as stored, including engine-assigned metadata. `None` when
    /// nothing was written.
    pub stored: Option<Record>,
}

impl WriteOutcome {
    fn none() -> Self {
        Self {
            rows_affected: 0,
            stored: None,
        }
    }

    fn one(stored: Record) -> Self {
        Self {
            rows_affected: 1,
            stored: Some(stored),
        }
    }

    pub fn meta(&self) -> Option<RecordMeta> {
        self.stored.as_ref().map(|r| r.meta)
    }
}

/// Generic tenant-scoped store for the table described by one [`Schema`].
///
/// Stores over different tables may share a [`ReadThroughCache`]; entries
/// are namespaced by table name.
pub struct RecordStore<S: ConnectionScope> {
    scope: Arc<S>,
    schema: Arc<Schema>,
    namespace: Arc<str>,
    cache: ReadThroughCache,
}

impl<S: ConnectionScope> Clone for RecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            schema: Arc::clone(&self.schema),
            namespace: Arc::clone(&self.namespace),
            cache: self.cache.clone(),
        }
    }
}

impl<S: ConnectionScope> std::fmt::Debug for RecordStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("table", &self.schema.table())
            .field("cache", &self.cache)
            .finish()
    }
}

impl<S: ConnectionScope> RecordStore<S> {
    pub fn new(scope: Arc<S>, schema: Schema, cache: ReadThroughCache) -> Self {
        let namespace: Arc<str> = Arc::from(schema.table());
        Self {
            scope,
            schema: Arc::new(schema),
            namespace,
            cache,
        }
    }

    /// Store with a private cache built from `config`.
    pub fn with_config(scope: Arc<S>, schema: Schema, config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let cache = ReadThroughCache::in_memory(config.cache.clone());
        Ok(Self::new(scope, schema, cache))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn scope(&self) -> &S {
        &self.scope
    }

    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    /// Create the table and its pagination index if they do not exist.
    pub async fn ensure_table(&self) -> StoreResult<()> {
        self.run(&Command::CreateTable).await?;
        tracing::info!(table = self.schema.table(), "table ensured");
        Ok(())
    }

    /// Insert a new row. A key collision fails with
    /// [`StoreError::UniquenessViolation`].
    pub async fn insert(&self, tenant: TenantKey, record: Record) -> StoreResult<WriteOutcome> {
        let record = self.stamp(tenant, record)?;
        let key = self.key_of(&record);
        let epoch = self.cache.epoch(&key);

        let outcome = self
            .write(&key, &Command::Insert {
                record: &record,
                conflict: OnConflict::Fail,
            })
            .await?;
        let stored = self.expect_row("insert", outcome)?;
        self.cache.commit(key, Some(stored.clone()), epoch);
        Ok(WriteOutcome::one(stored))
    }

    /// Insert unless the key already exists. Returns whether a row was
    /// written.
    pub async fn try_insert(&self, tenant: TenantKey, record: Record) -> StoreResult<bool> {
        let record = self.stamp(tenant, record)?;
        let key = self.key_of(&record);
        let epoch = self.cache.epoch(&key);

        let outcome = self
            .write(&key, &Command::Insert {
                record: &record,
                conflict: OnConflict::Ignore,
            })
            .await?;
        match outcome.into_single() {
            Some(row) => {
                let stored = self.check_row(row)?;
                self.cache.commit(key, Some(stored), epoch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Insert, or rewrite the value fields of the existing row.
    ///
    /// On conflict `modified` becomes `max(old_modified + 1, now)`, so it
    /// strictly increases even for writes within one clock tick.
    pub async fn upsert(&self, tenant: TenantKey, record: Record) -> StoreResult<WriteOutcome> {
        let record = self.stamp(tenant, record)?;
        let key = self.key_of(&record);
        let epoch = self.cache.epoch(&key);

        let outcome = self
            .write(&key, &Command::Insert {
                record: &record,
                conflict: OnConflict::UpdateValues,
            })
            .await?;
        let stored = self.expect_row("upsert", outcome)?;
        self.cache.commit(key, Some(stored.clone()), epoch);
        Ok(WriteOutcome::one(stored))
    }

    /// Rewrite the value fields of an existing row. A missing row is
    /// reported as zero rows affected.
    pub async fn update(&self, tenant: TenantKey, record: Record) -> StoreResult<WriteOutcome> {
        let record = self.stamp(tenant, record)?;
        let key = self.key_of(&record);
        let epoch = self.cache.epoch(&key);

        let outcome = self.write(&key, &Command::Update { record: &record }).await?;
        match outcome.into_single() {
            Some(row) => {
                let stored = self.check_row(row)?;
                self.cache.commit(key, Some(stored.clone()), epoch);
                Ok(WriteOutcome::one(stored))
            }
            None => {
                self.cache.evict(&key);
                Ok(WriteOutcome::none())
            }
        }
    }

    /// Delete a row. The cache entry is evicted whether or not the row
    /// existed.
    pub async fn delete(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<u64> {
        validate_key(&self.schema, &tenant, keys)?;
        let key = self.cache_key(tenant, keys);

        let outcome = self
            .write(&key, &Command::Delete {
                tenant,
                keys,
                returning: false,
            })
            .await?;
        self.cache.evict(&key);
        Ok(outcome.rows_affected)
    }

    /// Delete a row and return it, in one statement. At most one of any
    /// number of concurrent pops of the same key gets the record.
    pub async fn pop(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<Option<Record>> {
        validate_key(&self.schema, &tenant, keys)?;
        let key = self.cache_key(tenant, keys);

        let outcome = self
            .write(&key, &Command::Delete {
                tenant,
                keys,
                returning: true,
            })
            .await?;
        self.cache.evict(&key);
        outcome
            .into_single()
            .map(|row| self.check_row(row))
            .transpose()
    }

    /// Point read through the cache. Absence is cached too.
    pub async fn get(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<Option<Record>> {
        Ok(self.get_read(tenant, keys).await?.into_value())
    }

    /// Like [`get`](Self::get), also reporting whether the cache answered.
    pub async fn get_read(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<CacheRead> {
        validate_key(&self.schema, &tenant, keys)?;
        let key = self.cache_key(tenant, keys);

        self.cache
            .read_through(key, async {
                let outcome = self.run(&Command::Select { tenant, keys }).await?;
                outcome
                    .into_single()
                    .map(|row| self.check_row(row))
                    .transpose()
            })
            .await
    }

    /// Approximate row count of the whole table, for monitoring only.
    pub async fn count_dirty(&self) -> StoreResult<i64> {
        let outcome = self.run(&Command::CountDirty).await?;
        outcome.count.ok_or_else(|| {
            StoreError::from(StorageError::StatementFailed {
                table: self.schema.table().to_string(),
                reason: "count returned no value".to_string(),
            })
        })
    }

    /// Delete every row of a tenant and drop the tenant's cache entries.
    pub async fn purge_tenant(&self, tenant: TenantKey) -> StoreResult<u64> {
        validate_tenant(&self.schema, &tenant)?;
        let result = self.run(&Command::PurgeTenant { tenant }).await;
        self.cache.invalidate_tenant(&self.namespace, tenant);
        let outcome = result?;
        tracing::info!(
            table = self.schema.table(),
            tenant = %tenant,
            rows = outcome.rows_affected,
            "tenant purged"
        );
        Ok(outcome.rows_affected)
    }

    /// Validate a row read back from storage.
    pub(crate) fn check_row(&self, row: Record) -> StoreResult<Record> {
        match validate_record(&self.schema, &row) {
            Ok(()) => Ok(row),
            Err(source) => {
                tracing::error!(
                    table = self.schema.table(),
                    tenant = %row.tenant,
                    error = %source,
                    "stored row failed validation"
                );
                Err(StoreError::CorruptRecord {
                    table: self.schema.table().to_string(),
                    source,
                })
            }
        }
    }

    /// Acquire a handle, execute one command, release the handle.
    pub(crate) async fn run(&self, command: &Command<'_>) -> StoreResult<Outcome> {
        let mut handle = self.scope.acquire().await?;
        let result = handle.execute(&self.schema, command).await;
        drop(handle);

        match &result {
            Ok(outcome) => tracing::debug!(
                table = self.schema.table(),
                command = command.name(),
                rows = outcome.rows_affected,
                "statement executed"
            ),
            Err(err) => tracing::debug!(
                table = self.schema.table(),
                command = command.name(),
                error = %err,
                "statement failed"
            ),
        }
        result
    }

    /// Run a write. If it fails after reaching storage the row's state is
    /// unknown, so its cache entry is dropped.
    async fn write(&self, key: &CacheKey, command: &Command<'_>) -> StoreResult<Outcome> {
        let result = self.run(command).await;
        if result.is_err() {
            self.cache.evict(key);
        }
        result
    }

    /// Apply the caller's tenant, drop caller-supplied metadata, validate.
    fn stamp(&self, tenant: TenantKey, mut record: Record) -> StoreResult<Record> {
        if !record.tenant.is_empty() && record.tenant != tenant {
            tracing::warn!(
                table = self.schema.table(),
                payload_tenant = %record.tenant,
                tenant = %tenant,
                "payload tenant overridden by caller tenant"
            );
        }
        record.tenant = tenant;
        record.meta = RecordMeta::default();
        validate_record(&self.schema, &record)?;
        Ok(record)
    }

    fn expect_row(&self, operation: &str, outcome: Outcome) -> StoreResult<Record> {
        match outcome.into_single() {
            Some(row) => self.check_row(row),
            None => Err(StorageError::StatementFailed {
                table: self.schema.table().to_string(),
                reason: format!("{} returned no row", operation),
            }
            .into()),
        }
    }

    fn key_of(&self, record: &Record) -> CacheKey {
        self.cache_key(record.tenant, &record.keys)
    }

    fn cache_key(&self, tenant: TenantKey, keys: &[Value]) -> CacheKey {
        CacheKey::new(Arc::clone(&self.namespace), tenant, keys)
    }
}
