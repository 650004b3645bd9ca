//! Read-through cache with tenant-scoped keys and absence markers.
//!
//! # Tenant Isolation
//!
//! A [`CacheKey`] cannot be built without a namespace and a tenant key, so
//! two tenants (or two tables) never share an entry.
//!
//! # Consistency
//!
//! Every write through the record store updates or evicts the affected
//! entry synchronously, before the write returns. Concurrent fills are
//! ordered against writes to the same key with that key's [`Epoch`]: a read
//! that raced a write of its key is dropped instead of stored.

pub mod key;
pub mod memory;
pub mod read_through;
pub mod traits;

pub use key::CacheKey;
pub use memory::InMemoryCacheBackend;
pub use read_through::{CacheRead, ReadThroughCache};
pub use traits::{CacheBackend, CacheLookup, CacheStats, Epoch};
