//! Integration tests for backoffice-cache
//!
//! These tests verify end-to-end cache behavior across all components.

use backoffice_cache::backend::{InMemoryObjectStore, KeyValueStore, MemoryKeyValueStore};
use backoffice_cache::entity::{EntityPolicy, StorageKind};
use backoffice_cache::fetch::{with_cache, with_cache_invalidation};
use backoffice_cache::hooks::{CacheSource, CachedData, CachedDataOptions, MultiCachedData};
use backoffice_cache::observability::CountingMetrics;
use backoffice_cache::repository::InMemoryDataSource;
use backoffice_cache::{
    CacheConfig, CacheManager, CacheService, EntityType, Error, ManualClock,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn manager_with_clock(config: CacheConfig, clock: &ManualClock) -> CacheManager {
    CacheManager::in_memory(config).with_clock(Arc::new(clock.clone()))
}

/// Test 1: Idempotent Reads
///
/// Verifies that two calls of a wrapped fetch within the TTL:
/// - invoke the remote fetch once
/// - return equal values
#[tokio::test]
async fn test_wrapped_fetch_is_idempotent() {
    init_logging();
    let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let get_customers = with_cache(cache.clone(), EntityType::Customers, move |_: ()| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(json!([{"id": "c1", "name": "Asha"}]))
        }
    });

    let first = get_customers.call(()).await.expect("Failed to fetch customers");
    let second = get_customers.call(()).await.expect("Failed to fetch customers");

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test 2: Expiry Correctness
///
/// With a 5s TTL written at t=0, the entry is a hit at t=4999ms and a miss
/// at t=5001ms, in both backends.
#[tokio::test]
async fn test_expiry_boundary_in_both_backends() {
    init_logging();
    let clock = ManualClock::new(0);
    let config = CacheConfig::empty()
        .with_entity("tables", EntityPolicy::new(Duration::from_secs(5), StorageKind::Bounded))
        .with_entity("menus", EntityPolicy::new(Duration::from_secs(5), StorageKind::ObjectStore));
    let cache = manager_with_clock(config, &clock);

    cache.set("tables", json!([1]), "default").await.expect("Failed to set");
    cache.set("menus", json!([2]), "default").await.expect("Failed to set");

    clock.set(4_999);
    assert_eq!(cache.get("tables", "default").await.unwrap(), Some(json!([1])));
    assert_eq!(cache.get("menus", "default").await.unwrap(), Some(json!([2])));

    clock.set(5_001);
    assert_eq!(cache.get("tables", "default").await.unwrap(), None);
    assert_eq!(cache.get("menus", "default").await.unwrap(), None);

    // Expired entries are removed on read.
    assert!(cache
        .bounded_store()
        .get_item("bo_cache_tables_default")
        .unwrap()
        .is_none());
    assert!(cache.object_store().raw("menus", "default").is_none());
}

/// Test 3: Invalidation
#[tokio::test]
async fn test_set_invalidate_get() {
    init_logging();
    let cache = CacheManager::in_memory(CacheConfig::default());

    for entity_type in EntityType::ALL {
        cache
            .set(entity_type, json!({"v": 1}), "default")
            .await
            .expect("Failed to set");
        cache
            .invalidate(entity_type, "default")
            .await
            .expect("Failed to invalidate");
        assert_eq!(cache.get(entity_type, "default").await.unwrap(), None);
    }
}

/// Test 4: Coarse Mutation Invalidation
///
/// A successful mutation drops every key of its entity type; a failed one
/// drops nothing.
#[tokio::test]
async fn test_mutation_drops_every_key_of_type() {
    init_logging();
    let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
    cache.set(EntityType::Customers, json!(["all"]), "default").await.unwrap();
    cache.set(EntityType::Customers, json!(["vip"]), "[\"vip\"]").await.unwrap();

    let save_customer = with_cache_invalidation(
        cache.clone(),
        EntityType::Customers,
        |customer: serde_json::Value| async move {
            if customer.get("name").is_none() {
                return Err(Error::FetchError("name is required".to_string()));
            }
            Ok(customer)
        },
    );

    assert!(save_customer.call(json!({})).await.is_err());
    assert!(cache.is_valid(EntityType::Customers, "default").await.unwrap());

    save_customer
        .call(json!({"name": "Nila"}))
        .await
        .expect("Failed to save customer");
    assert!(!cache.is_valid(EntityType::Customers, "default").await.unwrap());
    assert!(!cache.is_valid(EntityType::Customers, "[\"vip\"]").await.unwrap());
}

/// Test 5: Cross-Entity Invalidation
///
/// Saving an invoice drops invoices, products and low-stock products, and
/// leaves customers cached.
#[tokio::test]
async fn test_save_invoice_cross_entity_invalidation() {
    init_logging();
    let source = InMemoryDataSource::new();
    source.insert_all(
        EntityType::Products,
        vec![json!({"id": "p1", "name": "Masala chai", "stock": 6, "min_stock": 5})],
    );
    source.insert_all(EntityType::Customers, vec![json!({"id": "c1"})]);
    let service = CacheService::new(
        source,
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
    );

    service.invoices().await.unwrap();
    service.products().await.unwrap();
    assert!(service.low_stock_products().await.unwrap().is_empty());
    service.customers().await.unwrap();

    service
        .save_invoice(json!({"customer_id": "c1", "items": [{"product_id": "p1", "quantity": 2}]}))
        .await
        .expect("Failed to save invoice");

    let cache = service.cache();
    assert!(!cache.is_valid(EntityType::Invoices, "default").await.unwrap());
    assert!(!cache.is_valid(EntityType::Products, "default").await.unwrap());
    assert!(!cache.is_valid(EntityType::LowStockProducts, "default").await.unwrap());
    assert!(cache.is_valid(EntityType::Customers, "default").await.unwrap());

    // The next read sees the adjusted stock.
    let low_stock = service.low_stock_products().await.unwrap();
    assert_eq!(low_stock.len(), 1);
    assert_eq!(low_stock[0]["stock"], 4);
}

/// Test 6: Payment Invalidation
#[tokio::test]
async fn test_save_payment_marks_invoice_and_invalidates() {
    init_logging();
    let source = InMemoryDataSource::new();
    source.insert_all(
        EntityType::Invoices,
        vec![json!({"id": "inv-1", "status": "pending"})],
    );
    let service = CacheService::new(
        source,
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
    );

    assert_eq!(service.invoices().await.unwrap()[0]["status"], "pending");
    service.payments().await.unwrap();

    service
        .save_payment(json!({"invoice_id": "inv-1", "amount": 240}))
        .await
        .expect("Failed to save payment");

    assert_eq!(service.invoices().await.unwrap()[0]["status"], "paid");
    assert_eq!(service.payments().await.unwrap().len(), 1);
    assert_eq!(service.source().fetch_count(EntityType::Invoices), 2);
}

/// Test 7: Quota Eviction
///
/// Fill the bounded store to capacity, then write once more: the oldest
/// quarter (rounded up) is evicted and the new entry is stored.
#[tokio::test]
async fn test_quota_eviction_drops_oldest_quarter() {
    init_logging();
    let clock = ManualClock::new(1_000_000);

    // Size of one entry, measured on an unbounded store.
    let probe = manager_with_clock(CacheConfig::default(), &clock);
    probe.set(EntityType::Users, json!(0), "k0").await.unwrap();
    let entry_size = probe.bounded_store().used_bytes();

    let store = MemoryKeyValueStore::with_capacity(entry_size * 8);
    let metrics = Arc::new(CountingMetrics::default());
    let cache = CacheManager::new(CacheConfig::default(), store.clone(), InMemoryObjectStore::new())
        .with_clock(Arc::new(clock.clone()))
        .with_metrics(metrics.clone());

    for i in 0..8 {
        assert!(cache
            .set(EntityType::Users, json!(i), &format!("k{}", i))
            .await
            .unwrap());
        clock.advance(Duration::from_millis(1));
    }
    assert_eq!(store.len(), 8);

    assert!(cache.set(EntityType::Users, json!(8), "k8").await.unwrap());

    assert_eq!(store.len(), 7);
    assert!(!cache.is_valid(EntityType::Users, "k0").await.unwrap());
    assert!(!cache.is_valid(EntityType::Users, "k1").await.unwrap());
    for i in 2..=8 {
        assert!(cache
            .is_valid(EntityType::Users, &format!("k{}", i))
            .await
            .unwrap());
    }
    assert_eq!(metrics.snapshot().evictions, 2);
}

/// Test 8: Quota Exhaustion Is Soft
///
/// An entry that cannot fit even after eviction is dropped without an error.
#[tokio::test]
async fn test_oversized_entry_is_dropped() {
    init_logging();
    let store = MemoryKeyValueStore::with_capacity(64);
    let cache = CacheManager::new(CacheConfig::default(), store, InMemoryObjectStore::new());

    let stored = cache
        .set(EntityType::BusinessSettings, json!({"name": "x".repeat(200)}), "default")
        .await
        .expect("Quota exhaustion must not be an error");
    assert!(!stored);
    assert!(!cache.is_valid(EntityType::BusinessSettings, "default").await.unwrap());
}

/// Test 9: Partial Failure Isolation
#[tokio::test]
async fn test_multi_source_partial_failure() {
    init_logging();
    let multi = MultiCachedData::new(
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
        vec![
            CacheSource::new(EntityType::Customers, || async { Ok(json!([{"id": "c1"}])) }),
            CacheSource::new(EntityType::Invoices, || async {
                Err(Error::FetchError("invoices unavailable".to_string()))
            }),
        ],
    );

    multi.mount().await;
    let state = multi.state();

    assert_eq!(state.data["customers"], json!([{"id": "c1"}]));
    assert_eq!(
        state.errors["invoices"],
        Error::FetchError("invoices unavailable".to_string())
    );
    assert!(!state.loading);
}

/// Test 10: Unmount Race Safety
///
/// A multi-source load that settles after unmount leaves the published
/// state untouched.
#[tokio::test]
async fn test_multi_source_result_after_unmount_is_discarded() {
    init_logging();
    let release = Arc::new(Notify::new());
    let gate = release.clone();

    let multi = MultiCachedData::new(
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
        vec![CacheSource::new(EntityType::Products, move || {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(json!(["idli"]))
            }
        })],
    );

    tokio::join!(multi.mount(), async {
        assert!(multi.state().loading);
        multi.unmount();
        release.notify_one();
    });

    let state = multi.state();
    assert!(state.loading);
    assert!(state.data.is_empty());
}

/// Test 11: Invalidating a Disabled Handle
///
/// The slot is dropped even though the disabled handle never refetches.
#[tokio::test]
async fn test_disabled_handle_invalidate_drops_slot() {
    init_logging();
    let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
    cache.set(EntityType::Users, json!(["ana"]), "default").await.unwrap();

    let handle = CachedData::new(
        cache.clone(),
        EntityType::Users,
        || async { Ok::<_, Error>(json!(["ben"])) },
        CachedDataOptions::default().enabled(false),
    );

    assert!(!handle.invalidate().await);
    assert!(!cache.is_valid(EntityType::Users, "default").await.unwrap());
    assert_eq!(handle.data(), None);
}

/// Test 12: Data Stays Visible During a Refresh
#[tokio::test]
async fn test_refetch_keeps_previous_data() {
    init_logging();
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let fetch = {
        let (started, release, calls) = (started.clone(), release.clone(), calls.clone());
        move || {
            let (started, release, calls) = (started.clone(), release.clone(), calls.clone());
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n > 0 {
                    started.notify_one();
                    release.notified().await;
                }
                Ok::<_, Error>(vec![n as u32 + 1])
            }
        }
    };
    let handle = CachedData::new(
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
        EntityType::Customers,
        fetch,
        CachedDataOptions::default(),
    );
    handle.mount().await;

    tokio::join!(handle.refetch(), async {
        started.notified().await;
        assert!(handle.is_refreshing());
        assert_eq!(handle.data(), Some(vec![1]));
        release.notify_one();
    });

    assert_eq!(handle.data(), Some(vec![2]));
    assert!(!handle.is_refreshing());
}

/// Test 13: Memoized Object Store Open
///
/// Many concurrent first operations share a single open.
#[tokio::test]
async fn test_object_store_opened_once() {
    init_logging();
    let objects = InMemoryObjectStore::new();
    let cache = CacheManager::new(CacheConfig::default(), MemoryKeyValueStore::new(), objects.clone());

    let reads = (0..16).map(|i| {
        let cache = &cache;
        async move { cache.get(EntityType::Invoices, &format!("[{}]", i)).await }
    });
    let results = futures::future::join_all(reads).await;

    assert!(results.iter().all(|r| matches!(r, Ok(None))));
    cache.set(EntityType::Payments, json!([]), "default").await.unwrap();
    assert_eq!(objects.open_count(), 1);
    assert_eq!(
        objects.collection_names(),
        vec!["customers", "invoices", "payments", "products"]
    );
}

/// Test 14: Schema Version Mismatch
///
/// Entries written under another schema version read as misses.
#[tokio::test]
async fn test_outdated_entries_are_misses() {
    init_logging();
    let kv = MemoryKeyValueStore::new();
    let objects = InMemoryObjectStore::new();

    let old = CacheManager::new(CacheConfig::default(), kv.clone(), objects.clone());
    old.set(EntityType::Users, json!(["old"]), "default").await.unwrap();
    old.set(EntityType::Products, json!(["old"]), "default").await.unwrap();

    let current = CacheManager::new(
        CacheConfig::default().with_schema_version(2),
        kv.clone(),
        objects,
    );
    assert_eq!(current.get(EntityType::Users, "default").await.unwrap(), None);
    assert_eq!(current.get(EntityType::Products, "default").await.unwrap(), None);
    assert!(kv.is_empty());
}

/// Test 15: Unconfigured Entity Types
#[tokio::test]
async fn test_unconfigured_type_is_noop() {
    init_logging();
    let cache = CacheManager::in_memory(CacheConfig::default().without_entity("userActivity"));

    assert!(!cache.set(EntityType::UserActivity, json!([]), "default").await.unwrap());
    assert_eq!(cache.get(EntityType::UserActivity, "default").await.unwrap(), None);
    assert!(cache.bounded_store().is_empty());
}

/// Test 16: Prefetch Tolerates Failures
#[tokio::test]
async fn test_prefetch_logs_failures_and_warms_the_rest() {
    init_logging();
    let source = InMemoryDataSource::new();
    source.fail(EntityType::Products);
    let service = CacheService::new(
        source,
        Arc::new(CacheManager::in_memory(CacheConfig::default())),
    );

    service
        .prefetch(&[EntityType::Customers, EntityType::Products, EntityType::BusinessSettings])
        .await;

    let cache = service.cache();
    assert!(cache.is_valid(EntityType::Customers, "default").await.unwrap());
    assert!(!cache.is_valid(EntityType::Products, "default").await.unwrap());
    assert!(cache.is_valid(EntityType::BusinessSettings, "default").await.unwrap());
}

/// Test 17: Stats Shape
#[tokio::test]
async fn test_stats_serialize_for_admin_ui() {
    init_logging();
    let cache = CacheManager::in_memory(CacheConfig::default());
    cache.set(EntityType::Users, json!(["ana"]), "default").await.unwrap();
    cache.set(EntityType::Invoices, json!([]), "default").await.unwrap();

    let stats = cache.stats().await.expect("Failed to collect stats");
    let value = serde_json::to_value(&stats).unwrap();

    assert_eq!(value["localStorage"]["users"]["count"], 1);
    assert_eq!(value["indexedDB"]["invoices"]["count"], 1);
    assert_eq!(value["totalSize"], stats.bounded["users"].size);
}
