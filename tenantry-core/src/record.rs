//! Records: ordered, fixed-shape tuples of typed fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TenantKey, Timestamp, Value};

/// Engine-assigned metadata of a stored record.
///
/// Never trusted from callers; the store fills it from the engine's answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordMeta {
    pub row_id: Option<i64>,
    pub created: Option<Timestamp>,
    pub modified: Option<Timestamp>,
}

/// One row of a tenant-scoped table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub tenant: TenantKey,
    pub keys: Vec<Value>,
    pub values: Vec<Value>,
    #[serde(default)]
    pub meta: RecordMeta,
}

impl Record {
    pub fn new(tenant: TenantKey, keys: Vec<Value>, values: Vec<Value>) -> Self {
        Self {
            tenant,
            keys,
            values,
            meta: RecordMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: RecordMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn row_id(&self) -> Option<i64> {
        self.meta.row_id
    }

    pub fn created(&self) -> Option<Timestamp> {
        self.meta.created
    }

    pub fn modified(&self) -> Option<Timestamp> {
        self.meta.modified
    }

    /// `modified` as a UTC datetime.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.meta.modified.and_then(DateTime::from_timestamp_millis)
    }

    /// `created` as a UTC datetime.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.meta.created.and_then(DateTime::from_timestamp_millis)
    }

    /// Field-for-field equality of the caller-owned parts, ignoring metadata.
    pub fn same_fields(&self, other: &Record) -> bool {
        self.tenant == other.tenant && self.keys == other.keys && self.values == other.values
    }
}
