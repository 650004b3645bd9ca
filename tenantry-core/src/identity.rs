//! Identity types for tenant-scoped records

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, as produced by the engine clock.
pub type Timestamp = i64;

/// Opaque identifier partitioning rows of one logical tenant.
///
/// The nil UUID is the empty tenant and never passes validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(Uuid);

impl TenantKey {
    /// The empty tenant key. Only useful as a placeholder in payloads that
    /// get stamped by the caller's tenant context.
    pub const EMPTY: TenantKey = TenantKey(Uuid::nil());

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh, timestamp-sortable tenant key.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for TenantKey {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
