//! Read-through cache semantics as seen through the record store.

use std::sync::Arc;

use tenantry_core::{CacheConfig, FieldDef, Schema, TenantKey, Value};
use tenantry_storage::{MemoryScope, ReadThroughCache, RecordStore};
use tenantry_test_utils::fixtures::{memory_store, memory_store_with, poll_once, setting};
use tenantry_test_utils::schemas;

fn key(name: &str) -> [Value; 1] {
    [Value::from(name)]
}

#[tokio::test]
async fn test_missing_key_hits_storage_once() {
    let (scope, store) = memory_store(schemas::setting()).await;
    let tenant = TenantKey::generate();
    let before = scope.round_trips();

    assert_eq!(store.get(tenant, &key("nope")).await.expect("get"), None);
    assert_eq!(store.get(tenant, &key("nope")).await.expect("get"), None);

    assert_eq!(scope.round_trips(), before + 1);
    let stats = store.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.absent_hits, 1);
}

#[tokio::test]
async fn test_absence_marker_is_replaced_by_insert() {
    let (_, store) = memory_store(schemas::setting()).await;
    let tenant = TenantKey::generate();

    assert_eq!(store.get(tenant, &key("theme")).await.expect("get"), None);
    store.insert(tenant, setting("theme", "dark")).await.expect("insert");

    let read = store.get_read(tenant, &key("theme")).await.expect("get");
    assert!(read.was_cache_hit());
    assert_eq!(
        read.into_value().map(|r| r.values),
        Some(vec![Value::from("dark")])
    );
}

#[tokio::test]
async fn test_absence_caching_disabled() {
    let (scope, store) = memory_store_with(
        schemas::setting(),
        MemoryScope::new(),
        CacheConfig::new().with_absence_caching(false),
    )
    .await;
    let tenant = TenantKey::generate();
    let before = scope.round_trips();

    store.get(tenant, &key("nope")).await.expect("get");
    store.get(tenant, &key("nope")).await.expect("get");

    assert_eq!(scope.round_trips(), before + 2);
}

#[tokio::test]
async fn test_delete_evicts_even_when_nothing_was_deleted() {
    let scope = MemoryScope::new();
    let (_, store) = memory_store_with(schemas::setting(), scope.clone(), CacheConfig::default()).await;
    let other = RecordStore::new(
        Arc::new(scope),
        schemas::setting(),
        ReadThroughCache::in_memory(CacheConfig::default()),
    );
    let tenant = TenantKey::generate();

    store.insert(tenant, setting("theme", "dark")).await.expect("insert");
    // Removed behind this store's back: its cache still holds the row.
    assert_eq!(other.delete(tenant, &key("theme")).await.expect("delete"), 1);
    assert!(store.get(tenant, &key("theme")).await.expect("get").is_some());

    assert_eq!(store.delete(tenant, &key("theme")).await.expect("delete"), 0);
    let read = store.get_read(tenant, &key("theme")).await.expect("get");
    assert!(!read.was_cache_hit());
    assert!(read.value().is_none());
}

#[tokio::test]
async fn test_bounded_cache_stays_correct() {
    let (_, store) = memory_store_with(
        schemas::setting(),
        MemoryScope::new(),
        CacheConfig::new().with_max_entries(2),
    )
    .await;
    let tenant = TenantKey::generate();

    let names = ["a", "b", "c", "d", "e"];
    for name in names {
        store.insert(tenant, setting(name, name)).await.expect("insert");
    }
    for name in names {
        let row = store.get(tenant, &key(name)).await.expect("get").expect("row");
        assert_eq!(row.values, vec![Value::from(name)]);
    }

    let stats = store.cache().stats();
    assert!(stats.entry_count <= 2);
    assert!(stats.evictions >= 3);
}

#[tokio::test]
async fn test_tables_sharing_a_cache_do_not_collide() {
    let scope = Arc::new(MemoryScope::new());
    let cache = ReadThroughCache::in_memory(CacheConfig::default());
    let preference = Schema::builder("preference")
        .key(FieldDef::text("name").len(1, 32))
        .value(FieldDef::text("value").max_len(8))
        .build()
        .expect("valid schema");

    let settings = RecordStore::new(Arc::clone(&scope), schemas::setting(), cache.clone());
    let preferences = RecordStore::new(Arc::clone(&scope), preference, cache.clone());
    settings.ensure_table().await.expect("create");
    preferences.ensure_table().await.expect("create");
    let tenant = TenantKey::generate();

    settings.insert(tenant, setting("theme", "dark")).await.expect("insert");
    preferences.insert(tenant, setting("theme", "light")).await.expect("insert");

    let a = settings.get(tenant, &key("theme")).await.expect("get").expect("row");
    let b = preferences.get(tenant, &key("theme")).await.expect("get").expect("row");
    assert_eq!(a.values, vec![Value::from("dark")]);
    assert_eq!(b.values, vec![Value::from("light")]);
    assert_eq!(cache.stats().entry_count, 2);
}

#[tokio::test]
async fn test_hit_rate_reported() {
    let (_, store) = memory_store(schemas::setting()).await;
    let tenant = TenantKey::generate();

    store.insert(tenant, setting("theme", "dark")).await.expect("insert");
    for _ in 0..3 {
        store.get(tenant, &key("theme")).await.expect("get");
    }
    store.get(tenant, &key("missing")).await.expect("get");

    let stats = store.cache().stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 0.75).abs() < 0.001);
}

#[tokio::test]
async fn test_absent_read_survives_write_to_another_key() {
    let (scope, store) = memory_store(schemas::setting()).await;
    let reader = TenantKey::generate();
    let writer = TenantKey::generate();
    let before = scope.round_trips();

    let nope = key("nope");
    let mut read = Box::pin(store.get(reader, &nope));
    assert!(poll_once(read.as_mut()).await);
    store.upsert(writer, setting("theme", "dark")).await.expect("upsert");
    store.delete(reader, &key("other")).await.expect("delete");
    assert_eq!(read.await.expect("get"), None);

    let again = store.get_read(reader, &nope).await.expect("get");
    assert!(again.was_cache_hit());
    assert_eq!(scope.round_trips(), before + 3);
}
