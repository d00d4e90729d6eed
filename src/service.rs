//! Cached facade over a [`DataSource`].
//!
//! Each read is served through the cache under its entity type; each write
//! runs against the source and then drops the entity types it affects.
//!
//! | Write | Invalidates |
//! |-------|-------------|
//! | customer save / delete | `customers` |
//! | product save | `products`, `lowStockProducts` |
//! | invoice save | `invoices`, `products`, `lowStockProducts` |
//! | invoice delete | `invoices` |
//! | payment save | `payments`, `invoices` |
//! | user save / delete | `users` |
//! | settings update | `businessSettings` |

use crate::backend::{InMemoryObjectStore, KeyValueStore, MemoryKeyValueStore, ObjectStore};
use crate::entity::EntityType;
use crate::error::Result;
use crate::fetch::{invalidate_after, read_through};
use crate::key::DEFAULT_KEY;
use crate::manager::CacheManager;
use crate::repository::{DataSource, Record};
use crate::stats::CacheStats;
use crate::strategy::CacheStrategy;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Entity types warmed by [`CacheService::prefetch`] when the caller has no preference.
pub const DEFAULT_PREFETCH: [EntityType; 3] = [
    EntityType::Customers,
    EntityType::Products,
    EntityType::Invoices,
];

const PRODUCT_WRITE: &[EntityType] = &[EntityType::Products, EntityType::LowStockProducts];
const INVOICE_SAVE: &[EntityType] = &[
    EntityType::Invoices,
    EntityType::Products,
    EntityType::LowStockProducts,
];
const PAYMENT_SAVE: &[EntityType] = &[EntityType::Payments, EntityType::Invoices];

/// Cached back-office service.
///
/// Cheap to clone; clones share the source and the cache manager.
///
/// # Example
///
/// ```
/// use backoffice_cache::repository::InMemoryDataSource;
/// use backoffice_cache::{CacheConfig, CacheManager, CacheService};
/// use std::sync::Arc;
///
/// let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
/// let service = CacheService::new(InMemoryDataSource::new(), cache);
/// # let _ = service;
/// ```
pub struct CacheService<
    D: DataSource,
    S: KeyValueStore = MemoryKeyValueStore,
    O: ObjectStore = InMemoryObjectStore,
> {
    source: Arc<D>,
    cache: Arc<CacheManager<S, O>>,
}

impl<D: DataSource, S: KeyValueStore, O: ObjectStore> Clone for CacheService<D, S, O> {
    fn clone(&self) -> Self {
        CacheService {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<D: DataSource, S: KeyValueStore, O: ObjectStore> CacheService<D, S, O> {
    pub fn new(source: D, cache: Arc<CacheManager<S, O>>) -> Self {
        CacheService {
            source: Arc::new(source),
            cache,
        }
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn cache(&self) -> &Arc<CacheManager<S, O>> {
        &self.cache
    }

    async fn cached<T, Fut>(&self, entity_type: EntityType, fetch: Fut) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        read_through(
            &self.cache,
            entity_type.as_str(),
            DEFAULT_KEY,
            CacheStrategy::Refresh,
            || fetch,
        )
        .await
    }

    async fn invalidating<T, Fut>(&self, entity_types: &[EntityType], mutation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        invalidate_after(&self.cache, entity_types, mutation).await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn customers(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::Customers, self.source.customers()).await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn products(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::Products, self.source.products()).await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn low_stock_products(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::LowStockProducts, self.source.low_stock_products())
            .await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn invoices(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::Invoices, self.source.invoices()).await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn payments(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::Payments, self.source.payments()).await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn users(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::Users, self.source.users()).await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn user_activity(&self) -> Result<Vec<Record>> {
        self.cached(EntityType::UserActivity, self.source.user_activity())
            .await
    }

    /// # Errors
    /// Returns the source's error on a miss that fails to fetch.
    pub async fn business_settings(&self) -> Result<Record> {
        self.cached(EntityType::BusinessSettings, self.source.business_settings())
            .await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn save_customer(&self, customer: Record) -> Result<Record> {
        self.invalidating(&[EntityType::Customers], self.source.save_customer(customer))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn delete_customer(&self, id: &str) -> Result<()> {
        self.invalidating(&[EntityType::Customers], self.source.delete_customer(id))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn save_product(&self, product: Record) -> Result<Record> {
        self.invalidating(PRODUCT_WRITE, self.source.save_product(product))
            .await
    }

    /// Save an invoice; stock levels change with it, so product lists are dropped too.
    ///
    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn save_invoice(&self, invoice: Record) -> Result<Record> {
        self.invalidating(INVOICE_SAVE, self.source.save_invoice(invoice))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn delete_invoice(&self, id: &str) -> Result<()> {
        self.invalidating(&[EntityType::Invoices], self.source.delete_invoice(id))
            .await
    }

    /// Save a payment; the paid invoice changes with it.
    ///
    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn save_payment(&self, payment: Record) -> Result<Record> {
        self.invalidating(PAYMENT_SAVE, self.source.save_payment(payment))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn save_user(&self, user: Record) -> Result<Record> {
        self.invalidating(&[EntityType::Users], self.source.save_user(user))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.invalidating(&[EntityType::Users], self.source.delete_user(id))
            .await
    }

    /// # Errors
    /// Returns the source's error; nothing is invalidated in that case.
    pub async fn update_business_settings(&self, settings: Record) -> Result<Record> {
        self.invalidating(
            &[EntityType::BusinessSettings],
            self.source.update_business_settings(settings),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Cache control
    // ------------------------------------------------------------------

    /// Drop every cached slot of `entity_type`.
    ///
    /// # Errors
    /// Returns `Err` if the backing store fails.
    pub async fn invalidate_cache(&self, entity_type: EntityType) -> Result<()> {
        self.cache.invalidate_type(entity_type).await
    }

    /// # Errors
    /// Returns `Err` if either backing store fails.
    pub async fn invalidate_all_caches(&self) -> Result<()> {
        self.cache.clear_all().await
    }

    /// # Errors
    /// Returns `Err` if either backing store fails.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    /// Load `entity_types` into the cache concurrently.
    ///
    /// Failures are logged per type and never returned, so one unreachable
    /// table does not stop the others from warming.
    pub async fn prefetch(&self, entity_types: &[EntityType]) {
        let outcomes = join_all(entity_types.iter().map(|t| self.warm(*t))).await;

        for (entity_type, outcome) in entity_types.iter().zip(outcomes) {
            match outcome {
                Ok(records) => debug!("✓ Prefetched {} ({} records)", entity_type, records),
                Err(e) => warn!("Failed to prefetch {}: {}", entity_type, e),
            }
        }
    }

    async fn warm(&self, entity_type: EntityType) -> Result<usize> {
        match entity_type {
            EntityType::Customers => self.customers().await.map(|r| r.len()),
            EntityType::Products => self.products().await.map(|r| r.len()),
            EntityType::Invoices => self.invoices().await.map(|r| r.len()),
            EntityType::Payments => self.payments().await.map(|r| r.len()),
            EntityType::Users => self.users().await.map(|r| r.len()),
            EntityType::BusinessSettings => self.business_settings().await.map(|_| 1),
            EntityType::LowStockProducts => self.low_stock_products().await.map(|r| r.len()),
            EntityType::UserActivity => self.user_activity().await.map(|r| r.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::repository::InMemoryDataSource;
    use serde_json::json;

    fn service() -> CacheService<InMemoryDataSource> {
        let source = InMemoryDataSource::new();
        source.insert_all(EntityType::Customers, vec![json!({"id": "c1"})]);
        source.insert_all(
            EntityType::Products,
            vec![json!({"id": "p1", "stock": 4, "min_stock": 2})],
        );
        let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
        CacheService::new(source, cache)
    }

    #[tokio::test]
    async fn test_reads_are_cached() {
        let service = service();

        service.customers().await.unwrap();
        service.customers().await.unwrap();

        assert_eq!(service.source().fetch_count(EntityType::Customers), 1);
    }

    #[tokio::test]
    async fn test_save_customer_invalidates() {
        let service = service();
        service.customers().await.unwrap();

        service.save_customer(json!({"name": "Meera"})).await.unwrap();
        let customers = service.customers().await.unwrap();

        assert_eq!(customers.len(), 2);
        assert_eq!(service.source().fetch_count(EntityType::Customers), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_cache() {
        let service = service();
        service.customers().await.unwrap();
        service.source().fail_writes(true);

        assert!(service.delete_customer("c1").await.is_err());
        service.customers().await.unwrap();
        assert_eq!(service.source().fetch_count(EntityType::Customers), 1);
    }

    #[tokio::test]
    async fn test_save_product_drops_low_stock() {
        let service = service();
        service.low_stock_products().await.unwrap();
        assert!(service
            .cache()
            .is_valid(EntityType::LowStockProducts, DEFAULT_KEY)
            .await
            .unwrap());

        service
            .save_product(json!({"id": "p2", "stock": 0, "min_stock": 1}))
            .await
            .unwrap();

        assert!(!service
            .cache()
            .is_valid(EntityType::LowStockProducts, DEFAULT_KEY)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_prefetch_default_set() {
        let service = service();
        service.prefetch(&DEFAULT_PREFETCH).await;

        let stats = service.cache_stats().await.unwrap();
        assert_eq!(stats.object_store["customers"].count, 1);
        assert_eq!(stats.object_store["products"].count, 1);
        assert_eq!(stats.object_store["invoices"].count, 1);
        assert_eq!(stats.object_store["payments"].count, 0);
    }
}
