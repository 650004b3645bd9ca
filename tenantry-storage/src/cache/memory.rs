//! In-process cache backend on a sharded concurrent map.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenantry_core::{CacheConfig, Record, TenantKey};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheLookup, CacheStats, Epoch};

/// Dropped slots kept before a compaction sweep is considered.
const COMPACT_THRESHOLD: usize = 1024;

/// One key's cached answer and write version.
///
/// A slot whose answer was dropped stays behind as a tombstone carrying its
/// version, so a fill that raced the drop still sees it. Tombstones are
/// swept once they outnumber live entries.
#[derive(Debug)]
struct Slot {
    cached: Option<Option<Record>>,
    version: u64,
}

/// Cache backend holding records in a [`DashMap`].
///
/// Version checks and the store/evict of one key happen under that key's
/// shard lock, so a write to a key and a fill of the same key are totally
/// ordered. Writes to other keys never reject a fill.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: DashMap<CacheKey, Slot>,
    generation: AtomicU64,
    live: AtomicUsize,
    tombstones: AtomicUsize,
    max_entries: Option<usize>,
    hits: AtomicU64,
    absent_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InMemoryCacheBackend {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            max_entries,
            hits: AtomicU64::new(0),
            absent_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Number of cached answers, present or absent.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        self.generation.load(Ordering::SeqCst) == epoch.generation
    }

    /// Replace a slot's answer, keeping the live and tombstone counts right.
    fn set(&self, slot: &mut Slot, cached: Option<Option<Record>>) {
        match (slot.cached.is_some(), cached.is_some()) {
            (false, true) => {
                self.tombstones.fetch_sub(1, Ordering::SeqCst);
                self.live.fetch_add(1, Ordering::SeqCst);
            }
            (true, false) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                self.tombstones.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        slot.cached = cached;
    }

    fn new_slot(&self, cached: Option<Option<Record>>, version: u64) -> Slot {
        if cached.is_some() {
            self.live.fetch_add(1, Ordering::SeqCst);
        } else {
            self.tombstones.fetch_add(1, Ordering::SeqCst);
        }
        Slot { cached, version }
    }

    /// Account for a slot removed from the map. Returns 1 if it was live.
    fn forget(&self, slot: &Slot) -> u64 {
        if slot.cached.is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
            1
        } else {
            self.tombstones.fetch_sub(1, Ordering::SeqCst);
            0
        }
    }

    /// Make room for `key` if the bound is reached. The victim's answer is
    /// dropped but its version stays, so no version bump is needed.
    fn make_room(&self, key: &CacheKey) {
        let Some(max) = self.max_entries else {
            return;
        };
        while self.live.load(Ordering::SeqCst) >= max {
            if self
                .entries
                .get(key)
                .is_some_and(|slot| slot.cached.is_some())
            {
                return;
            }
            let victim = self
                .entries
                .iter()
                .find(|e| e.value().cached.is_some() && e.key() != key)
                .map(|e| e.key().clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(mut slot) = self.entries.get_mut(&victim) {
                if slot.cached.is_some() {
                    self.set(&mut slot, None);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Sweep tombstones once they dominate the map. Bumping the generation
    /// first rejects any fill whose version might be swept.
    fn maybe_compact(&self) {
        let tombstones = self.tombstones.load(Ordering::SeqCst);
        if tombstones < COMPACT_THRESHOLD || tombstones < self.live.load(Ordering::SeqCst) {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.retain(|_, slot| {
            if slot.cached.is_some() {
                true
            } else {
                self.forget(slot);
                false
            }
        });
    }

    fn remove_where(&self, mut doomed: impl FnMut(&CacheKey) -> bool) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut removed = 0u64;
        self.entries.retain(|key, slot| {
            if doomed(key) {
                removed += self.forget(slot);
                false
            } else {
                true
            }
        });
        removed
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &CacheKey) -> CacheLookup {
        let lookup = match self.entries.get(key) {
            Some(slot) => match &slot.cached {
                Some(Some(record)) => CacheLookup::Present(record.clone()),
                Some(None) => CacheLookup::Absent,
                None => CacheLookup::Miss,
            },
            None => CacheLookup::Miss,
        };
        let counter = match &lookup {
            CacheLookup::Present(_) => &self.hits,
            CacheLookup::Absent => &self.absent_hits,
            CacheLookup::Miss => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        lookup
    }

    fn epoch(&self, key: &CacheKey) -> Epoch {
        let generation = self.generation.load(Ordering::SeqCst);
        let version = self.entries.get(key).map(|slot| slot.version).unwrap_or(0);
        Epoch {
            generation,
            version,
        }
    }

    fn fill(&self, key: CacheKey, value: Option<Record>, epoch: Epoch) -> bool {
        self.make_room(&key);
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !self.is_current(epoch) || occupied.get().version != epoch.version {
                    return false;
                }
                self.set(occupied.get_mut(), Some(value));
                true
            }
            Entry::Vacant(vacant) => {
                if !self.is_current(epoch) || epoch.version != 0 {
                    return false;
                }
                vacant.insert(self.new_slot(Some(value), 0));
                true
            }
        }
    }

    fn commit(&self, key: CacheKey, value: Option<Record>, epoch: Epoch) {
        self.make_room(&key);
        let fresh = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let fresh = self.is_current(epoch) && occupied.get().version == epoch.version;
                let slot = occupied.get_mut();
                slot.version += 1;
                self.set(slot, fresh.then_some(value));
                fresh
            }
            Entry::Vacant(vacant) => {
                let fresh = self.is_current(epoch) && epoch.version == 0;
                vacant.insert(self.new_slot(fresh.then_some(value), 1));
                fresh
            }
        };
        if !fresh {
            self.maybe_compact();
        }
    }

    fn evict(&self, key: &CacheKey) {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.version += 1;
                self.set(slot, None);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.new_slot(None, 1));
            }
        }
        self.maybe_compact();
    }

    fn invalidate_tenant(&self, namespace: &str, tenant: TenantKey) -> u64 {
        self.remove_where(|key| key.tenant() == tenant && key.namespace() == namespace)
    }

    fn invalidate_namespace(&self, namespace: &str) -> u64 {
        self.remove_where(|key| key.namespace() == namespace)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            absent_hits: self.absent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::Value;

    fn key(tenant: TenantKey, n: i64) -> CacheKey {
        CacheKey::new("t", tenant, &[Value::Int(n)])
    }

    fn record(tenant: TenantKey, n: i64) -> Record {
        Record::new(tenant, vec![Value::Int(n)], vec![Value::from("v")])
    }

    #[test]
    fn test_miss_present_absent() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        assert_eq!(backend.get(&key(tenant, 1)), CacheLookup::Miss);

        assert!(backend.fill(
            key(tenant, 1),
            Some(record(tenant, 1)),
            backend.epoch(&key(tenant, 1))
        ));
        assert!(backend.fill(key(tenant, 2), None, backend.epoch(&key(tenant, 2))));

        assert_eq!(
            backend.get(&key(tenant, 1)),
            CacheLookup::Present(record(tenant, 1))
        );
        assert_eq!(backend.get(&key(tenant, 2)), CacheLookup::Absent);

        let stats = backend.stats();
        assert_eq!((stats.hits, stats.absent_hits, stats.misses), (1, 1, 1));
    }

    #[test]
    fn test_fill_skipped_after_intervening_write() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let epoch = backend.epoch(&key(tenant, 1));

        backend.commit(
            key(tenant, 1),
            Some(record(tenant, 1)),
            backend.epoch(&key(tenant, 1)),
        );
        assert!(!backend.fill(key(tenant, 1), None, epoch));
        assert_eq!(
            backend.get(&key(tenant, 1)),
            CacheLookup::Present(record(tenant, 1))
        );
    }

    #[test]
    fn test_fill_survives_writes_to_other_keys() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let other = TenantKey::generate();
        let epoch = backend.epoch(&key(tenant, 1));

        backend.commit(key(tenant, 2), Some(record(tenant, 2)), backend.epoch(&key(tenant, 2)));
        backend.commit(key(other, 1), Some(record(other, 1)), backend.epoch(&key(other, 1)));
        backend.evict(&key(tenant, 3));

        assert!(backend.fill(key(tenant, 1), None, epoch));
        assert_eq!(backend.get(&key(tenant, 1)), CacheLookup::Absent);
    }

    #[test]
    fn test_evict_rejects_older_fill() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let epoch = backend.epoch(&key(tenant, 1));

        backend.evict(&key(tenant, 1));
        assert!(!backend.fill(key(tenant, 1), Some(record(tenant, 1)), epoch));
        assert_eq!(backend.get(&key(tenant, 1)), CacheLookup::Miss);

        let fresh = backend.epoch(&key(tenant, 1));
        assert!(backend.fill(key(tenant, 1), Some(record(tenant, 1)), fresh));
    }

    #[test]
    fn test_racing_commit_evicts() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let a = backend.epoch(&key(tenant, 1));
        let b = backend.epoch(&key(tenant, 1));

        backend.commit(key(tenant, 1), Some(record(tenant, 1)), b);
        backend.commit(key(tenant, 1), Some(record(tenant, 2)), a);
        assert_eq!(backend.get(&key(tenant, 1)), CacheLookup::Miss);
    }

    #[test]
    fn test_evict_is_idempotent() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        backend.evict(&key(tenant, 1));
        backend.evict(&key(tenant, 1));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_invalidate_tenant_only_touches_that_tenant() {
        let backend = InMemoryCacheBackend::default();
        let t1 = TenantKey::generate();
        let t2 = TenantKey::generate();
        for k in [
            key(t1, 1),
            key(t1, 2),
            key(t2, 1),
            CacheKey::new("other", t1, &[Value::Int(1)]),
        ] {
            let epoch = backend.epoch(&k);
            backend.fill(k, None, epoch);
        }

        assert_eq!(backend.invalidate_tenant("t", t1), 2);
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.invalidate_namespace("other"), 1);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_invalidation_rejects_older_fills() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let epoch = backend.epoch(&key(tenant, 1));

        backend.invalidate_tenant("t", tenant);
        assert!(!backend.fill(key(tenant, 1), None, epoch));
    }

    #[test]
    fn test_bound_evicts() {
        let backend = InMemoryCacheBackend::new(Some(2));
        let tenant = TenantKey::generate();
        for n in 0..5 {
            let epoch = backend.epoch(&key(tenant, n));
            assert!(backend.fill(key(tenant, n), None, epoch));
        }
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.stats().evictions, 3);
    }

    #[test]
    fn test_tombstones_are_compacted() {
        let backend = InMemoryCacheBackend::default();
        let tenant = TenantKey::generate();
        let stale = backend.epoch(&key(tenant, 0));

        for n in 0..(COMPACT_THRESHOLD as i64 * 2) {
            backend.evict(&key(tenant, n));
        }
        assert!(backend.entries.len() < COMPACT_THRESHOLD);
        assert!(backend.is_empty());
        assert!(!backend.fill(key(tenant, 0), None, stale));
    }
}
