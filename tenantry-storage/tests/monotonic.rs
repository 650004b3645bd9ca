//! The `modified` column strictly increases across writes to one record.

use std::collections::HashSet;
use std::sync::Arc;

use tenantry_core::{CacheConfig, ManualClock, TenantKey, Value};
use tenantry_storage::{MemoryScope, ReadThroughCache, RecordStore};
use tenantry_test_utils::fixtures::{activity, memory_store_with};
use tenantry_test_utils::schemas;

const T0: i64 = 1_700_000_000_000;

#[tokio::test]
async fn test_upserts_within_one_millisecond_are_strictly_increasing() {
    let clock = ManualClock::new(T0);
    let (_, store) = memory_store_with(
        schemas::activity(),
        MemoryScope::with_clock(clock),
        CacheConfig::default(),
    )
    .await;
    let tenant = TenantKey::generate();

    let mut observed = Vec::new();
    for n in 0..25 {
        let outcome = store
            .upsert(tenant, activity(1, &format!("v{}", n)))
            .await
            .expect("upsert");
        observed.push(outcome.meta().and_then(|m| m.modified).expect("modified"));
    }

    assert!(observed.windows(2).all(|w| w[0] < w[1]), "{:?}", observed);
    assert_eq!(observed.first(), Some(&T0));
    assert_eq!(observed.last(), Some(&(T0 + 24)));
}

#[tokio::test]
async fn test_clock_moving_backwards_still_advances() {
    let clock = ManualClock::new(T0);
    let (_, store) = memory_store_with(
        schemas::activity(),
        MemoryScope::with_clock(clock.clone()),
        CacheConfig::default(),
    )
    .await;
    let tenant = TenantKey::generate();

    store.insert(tenant, activity(1, "a")).await.expect("insert");
    clock.set(T0 - 60_000);

    let updated = store.update(tenant, activity(1, "b")).await.expect("update");
    assert_eq!(updated.meta().and_then(|m| m.modified), Some(T0 + 1));

    clock.set(T0 + 5_000);
    let updated = store.update(tenant, activity(1, "c")).await.expect("update");
    let meta = updated.meta().expect("stored row");
    assert_eq!(meta.modified, Some(T0 + 5_000));
    assert_eq!(meta.created, Some(T0));
}

#[tokio::test]
async fn test_created_and_row_id_never_change() {
    let clock = ManualClock::new(T0);
    let (_, store) = memory_store_with(
        schemas::activity(),
        MemoryScope::with_clock(clock.clone()),
        CacheConfig::default(),
    )
    .await;
    let tenant = TenantKey::generate();

    let first = store
        .upsert(tenant, activity(1, "a"))
        .await
        .expect("upsert")
        .meta()
        .expect("meta");
    clock.advance(1_000);
    store.insert(tenant, activity(2, "b")).await.expect("insert");
    let again = store
        .upsert(tenant, activity(1, "c"))
        .await
        .expect("upsert")
        .meta()
        .expect("meta");

    assert_eq!(again.created, first.created);
    assert_eq!(again.row_id, first.row_id);
    assert_eq!(again.modified, Some(T0 + 1_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_keep_cache_and_storage_in_step() {
    let clock = ManualClock::new(T0);
    let scope = MemoryScope::with_clock(clock);
    let (_, store) =
        memory_store_with(schemas::activity(), scope.clone(), CacheConfig::default()).await;
    let tenant = TenantKey::generate();

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for n in 0..10 {
                let note = format!("w{}-{}", writer, n);
                let outcome = store.upsert(tenant, activity(1, &note)).await?;
                seen.extend(outcome.meta().and_then(|m| m.modified));
                // Interleave point reads so fills race the writes.
                store.get(tenant, &[Value::Int(1)]).await?;
            }
            Ok::<_, tenantry_core::StoreError>(seen)
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        for modified in task.await.expect("join").expect("writer") {
            assert!(all.insert(modified), "modified {} observed twice", modified);
        }
    }
    assert_eq!(all.len(), 80);

    let cached = store
        .get(tenant, &[Value::Int(1)])
        .await
        .expect("get")
        .expect("row");
    let fresh = RecordStore::new(
        Arc::new(scope),
        schemas::activity(),
        ReadThroughCache::in_memory(CacheConfig::default()),
    );
    let stored = fresh
        .get(tenant, &[Value::Int(1)])
        .await
        .expect("get")
        .expect("row");

    assert_eq!(cached, stored);
    assert_eq!(stored.modified(), all.iter().max().copied());
}
