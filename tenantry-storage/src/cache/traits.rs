//! Cache backend trait and statistics.

use tenantry_core::{Record, TenantKey};

use super::key::CacheKey;

/// Outcome of a cache probe.
///
/// `Absent` is a cached fact ("confirmed absent in storage"), not a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Miss,
    Absent,
    Present(Record),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheLookup::Miss)
    }
}

/// Write version of one key, observed before a storage round trip.
///
/// A fill or write result is only stored if no other write touched the same
/// key (and no bulk invalidation ran) since the epoch was taken; otherwise
/// the entry is dropped, which costs a re-read but can never leave a stale
/// value behind. Writes to other keys do not affect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    /// Bumped whenever entries are removed wholesale.
    pub generation: u64,
    /// Number of writes seen by this key.
    pub version: u64,
}

/// Pluggable in-process cache backend.
///
/// Backends never fail: any internal problem degrades to a miss.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> CacheLookup;

    /// Current write epoch of `key`.
    fn epoch(&self, key: &CacheKey) -> Epoch;

    /// Store a value read from storage, unless a write to the key
    /// intervened since `epoch`. Returns whether the value was stored. Does
    /// not advance the version.
    fn fill(&self, key: CacheKey, value: Option<Record>, epoch: Epoch) -> bool;

    /// Record the result of a committed write. Stores `value` if no other
    /// write to the key intervened since `epoch`, otherwise evicts. Always
    /// advances the key's version.
    fn commit(&self, key: CacheKey, value: Option<Record>, epoch: Epoch);

    /// Drop one entry and advance its version. Idempotent.
    fn evict(&self, key: &CacheKey);

    /// Drop every entry of a tenant in a namespace.
    fn invalidate_tenant(&self, namespace: &str, tenant: TenantKey) -> u64;

    /// Drop every entry of a namespace.
    fn invalidate_namespace(&self, namespace: &str) -> u64;

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered with a cached record.
    pub hits: u64,
    /// Lookups answered with a cached absence marker.
    pub absent_hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Entries dropped to stay within the configured bound.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0), counting absence hits.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.absent_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 60,
            absent_hits: 20,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_lookup_is_hit() {
        assert!(!CacheLookup::Miss.is_hit());
        assert!(CacheLookup::Absent.is_hit());
    }
}
