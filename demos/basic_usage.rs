//! Basic usage of the back-office cache.

use backoffice_cache::debug::CacheDebug;
use backoffice_cache::repository::InMemoryDataSource;
use backoffice_cache::{
    CacheConfig, CacheManager, CacheService, CachedData, CachedDataOptions, DataSource, EntityType,
    Result,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Back-office Cache - Basic Example ===\n");

    // 1. Seed a source standing in for the remote database
    println!("1. Seeding the data source...");
    let source = InMemoryDataSource::new();
    source.insert_all(
        EntityType::Products,
        vec![
            json!({"id": "p1", "name": "Filter coffee", "stock": 40, "min_stock": 10, "is_active": true}),
            json!({"id": "p2", "name": "Paneer", "stock": 6, "min_stock": 5, "is_active": true}),
        ],
    );
    source.insert_all(
        EntityType::Customers,
        vec![json!({"id": "c1", "name": "Meera"})],
    );

    let cache = Arc::new(CacheManager::in_memory(CacheConfig::from_env()?));
    let service = CacheService::new(source, cache.clone());
    println!("   ✓ Cache ready\n");

    // 2. First read misses, second is served from the cache
    println!("2. Reading products twice:");
    let products = service.products().await?;
    service.products().await?;
    println!(
        "   ✓ {} products, {} remote fetch(es)\n",
        products.len(),
        service.source().fetch_count(EntityType::Products)
    );

    // 3. Saving an invoice drops invoices, products and low-stock products
    println!("3. Selling 2 units of paneer:");
    service
        .save_invoice(json!({"customer_id": "c1", "items": [{"product_id": "p2", "quantity": 2}]}))
        .await?;
    let low_stock = service.low_stock_products().await?;
    println!("   ✓ Low stock now: {:?}\n", low_stock.iter().map(|p| &p["name"]).collect::<Vec<_>>());

    // 4. Data handle: loads on mount, refetch skips the cache
    println!("4. Mounting a customers handle:");
    let handle_source = service.clone();
    let customers = CachedData::new(
        cache.clone(),
        EntityType::Customers,
        move || {
            let service = handle_source.clone();
            async move { service.source().customers().await.map(Value::from) }
        },
        CachedDataOptions::default()
            .on_success(|rows: &Value| println!("   ✓ Loaded {} customers", rows.as_array().map_or(0, Vec::len))),
    );
    customers.mount().await;
    customers.refetch().await;
    customers.unmount();
    println!();

    // 5. Prefetch the usual lists after login
    println!("5. Prefetching:");
    service.prefetch(&[EntityType::Customers, EntityType::Invoices, EntityType::Users]).await;
    println!("   ✓ Done\n");

    // 6. Inspect
    println!("6. Cache contents:");
    let console = CacheDebug::new(cache);
    for line in console.size_breakdown().await? {
        println!("   {}", line);
    }

    Ok(())
}
