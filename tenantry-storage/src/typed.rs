//! Typed entities over the generic record store.
//!
//! A business struct implements [`TableRecord`] once; [`TypedStore`] then
//! offers the full set of store operations in terms of that struct.

use std::marker::PhantomData;
use std::sync::Arc;

use tenantry_core::{
    ConfigError, FieldError, FieldErrorReason, FromValue, Record, RecordMeta, Schema, StoreError,
    StoreResult, TenantKey, Value,
};

use crate::cache::ReadThroughCache;
use crate::command::PageFilter;
use crate::pagination::{Cursor, Page};
use crate::scope::ConnectionScope;
use crate::store::RecordStore;

/// A Rust type stored as one row of a tenant-scoped table.
pub trait TableRecord: Sized + Send + Sync {
    /// Table descriptor.
    fn schema() -> Result<Schema, ConfigError>;

    /// Key and value fields in schema order. The tenant may be left
    /// [`TenantKey::EMPTY`]; the store stamps the caller's tenant.
    fn into_record(self) -> Record;

    /// Rebuild the entity from a stored row.
    fn from_record(record: Record) -> StoreResult<Self>;
}

/// Sequential reader over the fields of a stored row, for
/// [`TableRecord::from_record`] implementations.
pub struct FieldReader<'a> {
    table: &'a str,
    values: std::vec::IntoIter<Value>,
}

impl<'a> FieldReader<'a> {
    pub fn new(table: &'a str, values: Vec<Value>) -> Self {
        Self {
            table,
            values: values.into_iter(),
        }
    }

    /// Take the next field as `T`.
    pub fn read<T: FromValue>(&mut self, field: &str) -> StoreResult<T> {
        let corrupt = |reason| StoreError::CorruptRecord {
            table: self.table.to_string(),
            source: FieldError::new(field, reason),
        };
        let value = self.values.next().ok_or_else(|| {
            corrupt(FieldErrorReason::NullNotAllowed)
        })?;
        T::from_value(value).ok_or_else(|| {
            corrupt(FieldErrorReason::TypeMismatch {
                expected: T::KIND.name(),
            })
        })
    }
}

/// [`RecordStore`] speaking in terms of one entity type.
pub struct TypedStore<E: TableRecord, S: ConnectionScope> {
    store: RecordStore<S>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: TableRecord, S: ConnectionScope> Clone for TypedStore<E, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: TableRecord, S: ConnectionScope> TypedStore<E, S> {
    pub fn new(scope: Arc<S>, cache: ReadThroughCache) -> StoreResult<Self> {
        let schema = E::schema()?;
        Ok(Self {
            store: RecordStore::new(scope, schema, cache),
            _entity: PhantomData,
        })
    }

    /// The untyped store underneath.
    pub fn records(&self) -> &RecordStore<S> {
        &self.store
    }

    pub async fn ensure_table(&self) -> StoreResult<()> {
        self.store.ensure_table().await
    }

    pub async fn insert(&self, tenant: TenantKey, entity: E) -> StoreResult<RecordMeta> {
        let outcome = self.store.insert(tenant, entity.into_record()).await?;
        Ok(outcome.meta().unwrap_or_default())
    }

    pub async fn try_insert(&self, tenant: TenantKey, entity: E) -> StoreResult<bool> {
        self.store.try_insert(tenant, entity.into_record()).await
    }

    pub async fn upsert(&self, tenant: TenantKey, entity: E) -> StoreResult<RecordMeta> {
        let outcome = self.store.upsert(tenant, entity.into_record()).await?;
        Ok(outcome.meta().unwrap_or_default())
    }

    /// `None` if no row with the entity's key exists.
    pub async fn update(&self, tenant: TenantKey, entity: E) -> StoreResult<Option<RecordMeta>> {
        let outcome = self.store.update(tenant, entity.into_record()).await?;
        Ok(outcome.meta())
    }

    pub async fn delete(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<u64> {
        self.store.delete(tenant, keys).await
    }

    pub async fn pop(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<Option<E>> {
        self.store
            .pop(tenant, keys)
            .await?
            .map(E::from_record)
            .transpose()
    }

    pub async fn get(&self, tenant: TenantKey, keys: &[Value]) -> StoreResult<Option<E>> {
        self.store
            .get(tenant, keys)
            .await?
            .map(E::from_record)
            .transpose()
    }

    pub async fn page(
        &self,
        limit: i32,
        tenant: TenantKey,
        filter: &PageFilter,
        cursor: Option<Cursor>,
    ) -> StoreResult<Page<E>> {
        self.store
            .page(limit, tenant, filter, cursor)
            .await?
            .try_map(E::from_record)
    }

    pub async fn count_dirty(&self) -> StoreResult<i64> {
        self.store.count_dirty().await
    }

    pub async fn purge_tenant(&self, tenant: TenantKey) -> StoreResult<u64> {
        self.store.purge_tenant(tenant).await
    }
}
