//! Read-through cache over a pluggable backend.
//!
//! Reads consult the backend first and fall back to storage on a miss,
//! remembering both found records and confirmed absences. Writes never go
//! through here: the record store reports each committed write with
//! [`ReadThroughCache::commit`] or [`ReadThroughCache::evict`] before the
//! write call returns.

use std::future::Future;
use std::sync::Arc;

use tenantry_core::{CacheConfig, Record, StoreResult, TenantKey};

use super::key::CacheKey;
use super::memory::InMemoryCacheBackend;
use super::traits::{CacheBackend, CacheLookup, CacheStats, Epoch};

/// Result of a cached read, carrying where the answer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    value: Option<Record>,
    was_cache_hit: bool,
}

impl CacheRead {
    pub fn from_cache(value: Option<Record>) -> Self {
        Self {
            value,
            was_cache_hit: true,
        }
    }

    pub fn from_storage(value: Option<Record>) -> Self {
        Self {
            value,
            was_cache_hit: false,
        }
    }

    pub fn value(&self) -> Option<&Record> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Record> {
        self.value
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }
}

/// Read-through cache shared by every store of a process.
///
/// Cloning is cheap and clones share the backend.
///
/// # Example
///
/// ```ignore
/// let cache = ReadThroughCache::in_memory(CacheConfig::new().with_max_entries(10_000));
/// let read = cache.read_through(key, fetch_from_storage()).await?;
/// if !read.was_cache_hit() {
///     tracing::debug!("went to storage");
/// }
/// ```
pub struct ReadThroughCache<C: CacheBackend = InMemoryCacheBackend> {
    backend: Arc<C>,
    config: CacheConfig,
}

impl<C: CacheBackend> Clone for ReadThroughCache<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<C: CacheBackend> std::fmt::Debug for ReadThroughCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("config", &self.config)
            .field("stats", &self.backend.stats())
            .finish()
    }
}

impl ReadThroughCache<InMemoryCacheBackend> {
    /// Cache backed by an in-process map sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = InMemoryCacheBackend::from_config(&config);
        Self::new(Arc::new(backend), config)
    }
}

impl Default for ReadThroughCache<InMemoryCacheBackend> {
    fn default() -> Self {
        Self::in_memory(CacheConfig::default())
    }
}

impl<C: CacheBackend> ReadThroughCache<C> {
    pub fn new(backend: Arc<C>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let lookup = self.backend.get(key);
        match &lookup {
            CacheLookup::Miss => tracing::trace!(
                namespace = key.namespace(),
                tenant = %key.tenant(),
                "cache miss"
            ),
            CacheLookup::Absent => tracing::trace!(
                namespace = key.namespace(),
                tenant = %key.tenant(),
                "cache hit (absent)"
            ),
            CacheLookup::Present(_) => tracing::trace!(
                namespace = key.namespace(),
                tenant = %key.tenant(),
                "cache hit"
            ),
        }
        lookup
    }

    /// Epoch of `key` to capture before a storage round trip whose result
    /// will be passed to [`fill`](Self::fill) or [`commit`](Self::commit).
    pub fn epoch(&self, key: &CacheKey) -> Epoch {
        self.backend.epoch(key)
    }

    /// Remember a storage read. Absences are skipped when absence caching
    /// is disabled.
    pub fn fill(&self, key: CacheKey, value: Option<Record>, epoch: Epoch) -> bool {
        if value.is_none() && !self.config.cache_absence {
            return false;
        }
        self.backend.fill(key, value, epoch)
    }

    /// Record a committed write: the stored row, or `None` once the key is
    /// known to be gone.
    pub fn commit(&self, key: CacheKey, value: Option<Record>, epoch: Epoch) {
        if value.is_none() && !self.config.cache_absence {
            self.backend.evict(&key);
            return;
        }
        self.backend.commit(key, value, epoch);
    }

    /// Forget a key whose stored state is unknown.
    pub fn evict(&self, key: &CacheKey) {
        self.backend.evict(key);
    }

    pub fn invalidate_tenant(&self, namespace: &str, tenant: TenantKey) -> u64 {
        let removed = self.backend.invalidate_tenant(namespace, tenant);
        tracing::debug!(namespace, tenant = %tenant, removed, "cache tenant invalidated");
        removed
    }

    pub fn invalidate_namespace(&self, namespace: &str) -> u64 {
        self.backend.invalidate_namespace(namespace)
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    /// Answer from the cache, or await `fetch` and remember its answer.
    ///
    /// `fetch` is not polled on a hit. The key's epoch is taken before
    /// `fetch` runs, so a write to the same key that lands while the read is
    /// in flight keeps the read's (possibly older) answer out of the cache.
    pub async fn read_through<F>(&self, key: CacheKey, fetch: F) -> StoreResult<CacheRead>
    where
        F: Future<Output = StoreResult<Option<Record>>>,
    {
        match self.lookup(&key) {
            CacheLookup::Present(record) => return Ok(CacheRead::from_cache(Some(record))),
            CacheLookup::Absent => return Ok(CacheRead::from_cache(None)),
            CacheLookup::Miss => {}
        }

        let epoch = self.epoch(&key);
        let value = fetch.await?;
        self.fill(key, value.clone(), epoch);
        Ok(CacheRead::from_storage(value))
    }
}
