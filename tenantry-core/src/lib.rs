//! Tenantry Core - Record Types
//!
//! Pure data structures shared by every tenantry crate: tenant keys,
//! dynamically typed values, schema descriptors, records, the field
//! validator and the error taxonomy. No I/O lives here.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod schema;
pub mod validate;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, StoreConfig};
pub use error::{
    ConfigError, FieldError, FieldErrorReason, StorageError, StoreError, StoreResult,
};
pub use identity::{TenantKey, Timestamp};
pub use record::{Record, RecordMeta};
pub use schema::{
    check_identifier, FieldDef, FieldRole, PageOrder, Schema, SchemaBuilder, CREATED_COLUMN,
    DEFAULT_TENANT_COLUMN, MODIFIED_COLUMN, PAGE_INDEX_SUFFIX, ROW_ID_COLUMN,
};
pub use validate::{validate_field, validate_key, validate_record, validate_tenant};
pub use value::{FieldKind, FromValue, Value};
