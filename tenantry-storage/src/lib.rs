//! Tenantry Storage
//!
//! The tenant-scoped record store: a generic CRUD executor over a
//! [`Schema`](tenantry_core::Schema), a read-through cache with absence
//! markers and synchronous write invalidation, and keyset pagination.
//!
//! Engines plug in through [`ConnectionScope`]. [`MemoryScope`] is the
//! in-process engine; SQL engines render commands with [`sql::render`].

pub mod cache;
pub mod command;
pub mod memory;
pub mod pagination;
pub mod scope;
pub mod sql;
pub mod store;
pub mod typed;

pub use cache::{
    CacheBackend, CacheKey, CacheLookup, CacheRead, CacheStats, Epoch, InMemoryCacheBackend,
    ReadThroughCache,
};
pub use command::{Command, FieldFilter, FilterOp, OnConflict, PageFilter, PageQuery};
pub use memory::{MemoryHandle, MemoryScope};
pub use pagination::{plan_fetch, split_window, Cursor, Page};
pub use scope::{ConnectionScope, Dialect, Outcome, ScopeHandle};
pub use sql::{render, Rendered};
pub use store::{RecordStore, WriteOutcome};
pub use typed::{FieldReader, TableRecord, TypedStore};
