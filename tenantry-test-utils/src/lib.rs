//! Tenantry Test Utilities
//!
//! Shared test infrastructure for the tenantry workspace:
//! - Sample table schemas and a typed sample entity
//! - Proptest generators for tenants, values and records
//! - Fixtures wiring a record store to the in-memory engine
//! - Assertions on the store's error taxonomy

use std::sync::Arc;

pub use tenantry_core::{
    CacheConfig, FieldDef, FieldErrorReason, ManualClock, PageOrder, Record, RecordMeta, Schema,
    StoreError, StoreResult, TenantKey, Value,
};
pub use tenantry_storage::{
    Cursor, FieldReader, MemoryScope, Page, PageFilter, ReadThroughCache, RecordStore,
    TableRecord, TypedStore,
};

use tenantry_core::ConfigError;

// ============================================================================
// SAMPLE SCHEMAS
// ============================================================================

pub mod schemas {
    //! Table shapes modelled on typical per-tenant data.

    use super::*;

    /// Single-consumption tokens: keyed by raw bytes, no value fields.
    pub fn nonce() -> Schema {
        Schema::builder("nonce")
            .key(FieldDef::bytes("nonce").len(16, 32))
            .history()
            .build()
            .expect("nonce schema is valid")
    }

    /// Messages paged most recent first.
    pub fn inbox() -> Schema {
        Schema::builder("inbox")
            .key(FieldDef::bytes("message_id").len(16, 16))
            .value(FieldDef::text("body").max_len(256))
            .value(FieldDef::text("sender").nullable().max_len(64))
            .history()
            .row_id()
            .order(PageOrder::CreatedDesc)
            .build()
            .expect("inbox schema is valid")
    }

    /// Activity feed paged by last modification.
    pub fn activity() -> Schema {
        Schema::builder("activity")
            .key(FieldDef::int("item_id"))
            .value(FieldDef::text("note").max_len(128))
            .history()
            .row_id()
            .order(PageOrder::ModifiedDesc)
            .build()
            .expect("activity schema is valid")
    }

    /// Plain key-value table without history or row sequence.
    pub fn setting() -> Schema {
        Schema::builder("setting")
            .key(FieldDef::text("name").len(1, 32))
            .value(FieldDef::text("value").max_len(8))
            .build()
            .expect("setting schema is valid")
    }
}

// ============================================================================
// SAMPLE ENTITY
// ============================================================================

/// A user profile, stored in the `profile` table in row order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub handle: String,
    pub display_name: String,
    pub avatar: Option<Vec<u8>>,
    pub visits: i64,
}

impl Profile {
    pub fn new(handle: &str, display_name: &str) -> Self {
        Self {
            handle: handle.to_string(),
            display_name: display_name.to_string(),
            avatar: None,
            visits: 0,
        }
    }

    pub fn key(handle: &str) -> [Value; 1] {
        [Value::from(handle)]
    }
}

impl TableRecord for Profile {
    fn schema() -> Result<Schema, ConfigError> {
        Schema::builder("profile")
            .key(FieldDef::text("handle").len(1, 32))
            .value(FieldDef::text("display_name").len(1, 64))
            .value(FieldDef::bytes("avatar").nullable().max_len(1024))
            .value(FieldDef::int("visits"))
            .history()
            .row_id()
            .build()
    }

    fn into_record(self) -> Record {
        Record::new(
            TenantKey::EMPTY,
            vec![Value::from(self.handle)],
            vec![
                Value::from(self.display_name),
                Value::from(self.avatar),
                Value::Int(self.visits),
            ],
        )
    }

    fn from_record(record: Record) -> StoreResult<Self> {
        let mut keys = FieldReader::new("profile", record.keys);
        let mut values = FieldReader::new("profile", record.values);
        Ok(Self {
            handle: keys.read("handle")?,
            display_name: values.read("display_name")?,
            avatar: values.read("avatar")?,
            visits: values.read("visits")?,
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenants, values and records.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a non-empty tenant key.
    pub fn arb_tenant() -> impl Strategy<Value = TenantKey> {
        any::<[u8; 16]>()
            .prop_filter("tenant must not be nil", |b| b.iter().any(|x| *x != 0))
            .prop_map(|b| TenantKey::new(Uuid::from_bytes(b)))
    }

    /// Generate a value of any variant.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-z]{0,12}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..12).prop_map(Value::Bytes),
            any::<[u8; 16]>().prop_map(|b| Value::Uuid(Uuid::from_bytes(b))),
            any::<i64>().prop_map(Value::Timestamp),
        ]
    }

    /// Generate a valid inbox message body.
    pub fn arb_body() -> impl Strategy<Value = String> {
        "[ -~]{0,256}"
    }

    /// Generate a valid inbox message id.
    pub fn arb_message_id() -> impl Strategy<Value = Vec<u8>> {
        any::<[u8; 16]>().prop_map(|b| b.to_vec())
    }

    /// Generate a set of distinct activity item ids.
    pub fn arb_item_ids(max: usize) -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::btree_set(0i64..10_000, 0..max)
            .prop_map(|set| set.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built stores and records for common scenarios.

    use std::future::Future;
    use std::pin::Pin;
    use std::task::Poll;

    use super::*;

    /// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from
    /// every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// A store over a fresh in-memory engine, with its table created.
    pub async fn memory_store(schema: Schema) -> (MemoryScope, RecordStore<MemoryScope>) {
        memory_store_with(schema, MemoryScope::new(), CacheConfig::default()).await
    }

    /// Like [`memory_store`] with an explicit engine and cache config.
    pub async fn memory_store_with(
        schema: Schema,
        scope: MemoryScope,
        cache: CacheConfig,
    ) -> (MemoryScope, RecordStore<MemoryScope>) {
        let store = RecordStore::new(
            Arc::new(scope.clone()),
            schema,
            ReadThroughCache::in_memory(cache),
        );
        store.ensure_table().await.expect("create table");
        (scope, store)
    }

    /// Inbox message with a 16-byte id derived from `n`.
    pub fn message(n: u8, body: &str) -> Record {
        Record::new(
            TenantKey::EMPTY,
            vec![Value::Bytes(message_id(n))],
            vec![Value::from(body), Value::Null],
        )
    }

    pub fn message_id(n: u8) -> Vec<u8> {
        let mut id = vec![0xA5; 16];
        id[15] = n;
        id
    }

    pub fn activity(item_id: i64, note: &str) -> Record {
        Record::new(
            TenantKey::EMPTY,
            vec![Value::Int(item_id)],
            vec![Value::from(note)],
        )
    }

    pub fn setting(name: &str, value: &str) -> Record {
        Record::new(
            TenantKey::EMPTY,
            vec![Value::from(name)],
            vec![Value::from(value)],
        )
    }

    /// Walk every page from the start and collect all items.
    pub async fn collect_pages(
        store: &RecordStore<MemoryScope>,
        limit: i32,
        tenant: TenantKey,
        filter: &PageFilter,
    ) -> StoreResult<Vec<Record>> {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page: Page<Record> = store.page(limit, tenant, filter, cursor).await?;
            items.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    /// Poll `fut` once and report whether it is still pending. Parks an
    /// operation at its first storage round trip.
    pub async fn poll_once<F: Future>(mut fut: Pin<&mut F>) -> bool {
        std::future::poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx).is_pending())).await
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the store's error taxonomy.

    use super::*;

    /// Assert that a StoreResult is a validation error on `field`.
    #[track_caller]
    pub fn assert_validation<T: std::fmt::Debug>(
        result: &StoreResult<T>,
        field: &str,
        reason: FieldErrorReason,
    ) {
        match result {
            Err(StoreError::Validation(err)) => {
                assert_eq!(err.field, field, "Wrong field in validation error");
                assert_eq!(err.reason, reason, "Wrong reason in validation error");
            }
            other => panic!("Expected Validation error on {}, got: {:?}", field, other),
        }
    }

    /// Assert that a StoreResult is a uniqueness violation.
    #[track_caller]
    pub fn assert_uniqueness<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::UniquenessViolation { .. }) => {}
            other => panic!("Expected UniquenessViolation, got: {:?}", other),
        }
    }

    /// Assert that a StoreResult is a contract violation.
    #[track_caller]
    pub fn assert_contract<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::ContractViolation { .. }) => {}
            other => panic!("Expected ContractViolation, got: {:?}", other),
        }
    }
}
