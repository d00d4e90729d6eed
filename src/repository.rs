//! Remote data source abstraction.
//!
//! [`DataSource`] is the seam between the cache layer and the hosted
//! database. Records are plain JSON objects; the cache stores whatever the
//! source returns without interpreting it.
//!
//! [`InMemoryDataSource`] is a test double with per-read call counters and
//! failure injection.

use crate::entity::EntityType;
use crate::error::{Error, Result};
use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One row as returned by the remote store.
pub type Record = Value;

/// Maximum number of activity entries returned by [`DataSource::user_activity`].
pub const USER_ACTIVITY_LIMIT: usize = 100;

/// Remote store operations used by the back-office.
///
/// Reads return the full list for their entity type. Writes are upserts
/// keyed by the record's `id` and return the stored record.
#[allow(async_fn_in_trait)]
pub trait DataSource: Send + Sync {
    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn customers(&self) -> Result<Vec<Record>>;

    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn products(&self) -> Result<Vec<Record>>;

    /// Active products whose `stock` is at or below their `min_stock`.
    ///
    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn low_stock_products(&self) -> Result<Vec<Record>>;

    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn invoices(&self) -> Result<Vec<Record>>;

    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn payments(&self) -> Result<Vec<Record>>;

    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn users(&self) -> Result<Vec<Record>>;

    /// Most recent activity first, at most [`USER_ACTIVITY_LIMIT`] entries.
    ///
    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn user_activity(&self) -> Result<Vec<Record>>;

    /// The single business settings object (`{}` when none is stored).
    ///
    /// # Errors
    /// Returns `Err` if the remote store is unreachable or rejects the query.
    async fn business_settings(&self) -> Result<Record>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn save_customer(&self, customer: Record) -> Result<Record>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn delete_customer(&self, id: &str) -> Result<()>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn save_product(&self, product: Record) -> Result<Record>;

    /// Store an invoice. Implementations also adjust product stock.
    ///
    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn save_invoice(&self, invoice: Record) -> Result<Record>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn delete_invoice(&self, id: &str) -> Result<()>;

    /// Record a payment. Implementations also update the invoice's paid state.
    ///
    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn save_payment(&self, payment: Record) -> Result<Record>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn save_user(&self, user: Record) -> Result<Record>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn delete_user(&self, id: &str) -> Result<()>;

    /// # Errors
    /// Returns `Err` if the write is rejected.
    async fn update_business_settings(&self, settings: Record) -> Result<Record>;
}

// ============================================================================
// In-Memory Test Source
// ============================================================================

/// In-memory [`DataSource`] for tests and demos.
///
/// Tables are keyed by entity type name. Every read bumps a counter for its
/// entity type, so tests can tell cache hits from remote fetches. Reads of a
/// type marked with [`fail`](Self::fail) return `Error::FetchError`; writes
/// fail while [`fail_writes`](Self::fail_writes) is set.
///
/// Clones share the same tables and counters.
#[derive(Clone, Default)]
pub struct InMemoryDataSource {
    tables: Arc<DashMap<String, Vec<Record>>>,
    fetches: Arc<DashMap<String, usize>>,
    failing: Arc<DashSet<String>>,
    writes_fail: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `entity_type`'s table, replacing its rows.
    pub fn insert_all(&self, entity_type: EntityType, rows: Vec<Record>) {
        self.tables.insert(entity_type.as_str().to_string(), rows);
    }

    /// Rows currently stored for `entity_type`.
    pub fn rows(&self, entity_type: EntityType) -> Vec<Record> {
        self.tables
            .get(entity_type.as_str())
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Number of remote reads served for `entity_type`.
    pub fn fetch_count(&self, entity_type: EntityType) -> usize {
        self.fetches
            .get(entity_type.as_str())
            .map(|c| *c.value())
            .unwrap_or(0)
    }

    /// Make reads of `entity_type` fail until [`recover`](Self::recover).
    pub fn fail(&self, entity_type: EntityType) {
        self.failing.insert(entity_type.as_str().to_string());
    }

    pub fn recover(&self, entity_type: EntityType) {
        self.failing.remove(entity_type.as_str());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    fn read(&self, entity_type: EntityType) -> Result<Vec<Record>> {
        *self
            .fetches
            .entry(entity_type.as_str().to_string())
            .or_insert(0) += 1;

        if self.failing.contains(entity_type.as_str()) {
            return Err(Error::FetchError(format!(
                "remote read of {} failed",
                entity_type
            )));
        }

        Ok(self.rows(entity_type))
    }

    fn check_writable(&self) -> Result<()> {
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(Error::FetchError("remote write rejected".to_string()));
        }
        Ok(())
    }

    fn upsert(&self, entity_type: EntityType, mut record: Record) -> Result<Record> {
        self.check_writable()?;

        let Some(fields) = record.as_object_mut() else {
            return Err(Error::FetchError(format!(
                "{} record must be a JSON object",
                entity_type
            )));
        };
        if !fields.contains_key("id") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            fields.insert("id".to_string(), json!(format!("{}-{}", entity_type, id)));
        }

        let mut table = self
            .tables
            .entry(entity_type.as_str().to_string())
            .or_default();
        match table.iter_mut().find(|row| row.get("id") == record.get("id")) {
            Some(row) => *row = record.clone(),
            None => table.push(record.clone()),
        }

        Ok(record)
    }

    fn remove(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.check_writable()?;

        if let Some(mut table) = self.tables.get_mut(entity_type.as_str()) {
            table.retain(|row| row.get("id").and_then(Value::as_str) != Some(id));
        }
        Ok(())
    }

    fn adjust_stock(&self, invoice: &Record) {
        let Some(items) = invoice.get("items").and_then(Value::as_array) else {
            return;
        };
        let Some(mut products) = self.tables.get_mut(EntityType::Products.as_str()) else {
            return;
        };

        for item in items {
            let (Some(product_id), Some(quantity)) = (
                item.get("product_id").and_then(Value::as_str),
                item.get("quantity").and_then(Value::as_i64),
            ) else {
                continue;
            };

            if let Some(product) = products
                .iter_mut()
                .find(|p| p.get("id").and_then(Value::as_str) == Some(product_id))
            {
                let stock = product.get("stock").and_then(Value::as_i64).unwrap_or(0);
                product["stock"] = json!(stock - quantity);
            }
        }
    }

    fn mark_paid(&self, payment: &Record) {
        let Some(invoice_id) = payment.get("invoice_id").and_then(Value::as_str) else {
            return;
        };
        if let Some(mut invoices) = self.tables.get_mut(EntityType::Invoices.as_str()) {
            if let Some(invoice) = invoices
                .iter_mut()
                .find(|i| i.get("id").and_then(Value::as_str) == Some(invoice_id))
            {
                invoice["status"] = json!("paid");
            }
        }
    }
}

fn is_low_stock(product: &Record) -> bool {
    let active = product
        .get("is_active")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let stock = product.get("stock").and_then(Value::as_i64);
    let min_stock = product.get("min_stock").and_then(Value::as_i64);

    match (stock, min_stock) {
        (Some(stock), Some(min_stock)) => active && stock <= min_stock,
        _ => false,
    }
}

impl DataSource for InMemoryDataSource {
    async fn customers(&self) -> Result<Vec<Record>> {
        self.read(EntityType::Customers)
    }

    async fn products(&self) -> Result<Vec<Record>> {
        self.read(EntityType::Products)
    }

    async fn low_stock_products(&self) -> Result<Vec<Record>> {
        *self
            .fetches
            .entry(EntityType::LowStockProducts.as_str().to_string())
            .or_insert(0) += 1;

        if self.failing.contains(EntityType::LowStockProducts.as_str()) {
            return Err(Error::FetchError(
                "remote read of lowStockProducts failed".to_string(),
            ));
        }

        Ok(self
            .rows(EntityType::Products)
            .into_iter()
            .filter(is_low_stock)
            .collect())
    }

    async fn invoices(&self) -> Result<Vec<Record>> {
        self.read(EntityType::Invoices)
    }

    async fn payments(&self) -> Result<Vec<Record>> {
        self.read(EntityType::Payments)
    }

    async fn users(&self) -> Result<Vec<Record>> {
        self.read(EntityType::Users)
    }

    async fn user_activity(&self) -> Result<Vec<Record>> {
        let mut rows = self.read(EntityType::UserActivity)?;
        rows.sort_by(|a, b| {
            let ts = |r: &Record| r.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
            ts(b).cmp(&ts(a))
        });
        rows.truncate(USER_ACTIVITY_LIMIT);
        Ok(rows)
    }

    async fn business_settings(&self) -> Result<Record> {
        Ok(self
            .read(EntityType::BusinessSettings)?
            .into_iter()
            .next()
            .unwrap_or_else(|| json!({})))
    }

    async fn save_customer(&self, customer: Record) -> Result<Record> {
        self.upsert(EntityType::Customers, customer)
    }

    async fn delete_customer(&self, id: &str) -> Result<()> {
        self.remove(EntityType::Customers, id)
    }

    async fn save_product(&self, product: Record) -> Result<Record> {
        self.upsert(EntityType::Products, product)
    }

    async fn save_invoice(&self, invoice: Record) -> Result<Record> {
        let stored = self.upsert(EntityType::Invoices, invoice)?;
        self.adjust_stock(&stored);
        Ok(stored)
    }

    async fn delete_invoice(&self, id: &str) -> Result<()> {
        self.remove(EntityType::Invoices, id)
    }

    async fn save_payment(&self, payment: Record) -> Result<Record> {
        let stored = self.upsert(EntityType::Payments, payment)?;
        self.mark_paid(&stored);
        Ok(stored)
    }

    async fn save_user(&self, user: Record) -> Result<Record> {
        self.upsert(EntityType::Users, user)
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        self.remove(EntityType::Users, id)
    }

    async fn update_business_settings(&self, settings: Record) -> Result<Record> {
        self.check_writable()?;
        self.insert_all(EntityType::BusinessSettings, vec![settings.clone()]);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_are_counted() {
        let source = InMemoryDataSource::new();
        source.insert_all(EntityType::Customers, vec![json!({"id": "c1"})]);

        assert_eq!(source.customers().await.unwrap().len(), 1);
        assert_eq!(source.customers().await.unwrap().len(), 1);
        assert_eq!(source.fetch_count(EntityType::Customers), 2);
        assert_eq!(source.fetch_count(EntityType::Products), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let source = InMemoryDataSource::new();
        source.fail(EntityType::Payments);
        assert!(matches!(
            source.payments().await,
            Err(Error::FetchError(_))
        ));

        source.recover(EntityType::Payments);
        assert!(source.payments().await.is_ok());

        source.fail_writes(true);
        assert!(source.save_user(json!({"name": "ana"})).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_assigns_and_keeps_ids() {
        let source = InMemoryDataSource::new();
        let saved = source.save_customer(json!({"name": "Ravi"})).await.unwrap();
        let id = saved["id"].as_str().unwrap().to_string();

        source
            .save_customer(json!({"id": id.clone(), "name": "Ravi K"}))
            .await
            .unwrap();
        let rows = source.rows(EntityType::Customers);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Ravi K");

        source.delete_customer(&id).await.unwrap();
        assert!(source.rows(EntityType::Customers).is_empty());
    }

    #[tokio::test]
    async fn test_low_stock_uses_min_stock() {
        let source = InMemoryDataSource::new();
        source.insert_all(
            EntityType::Products,
            vec![
                json!({"id": "p1", "stock": 2, "min_stock": 5}),
                json!({"id": "p2", "stock": 9, "min_stock": 5}),
                json!({"id": "p3", "stock": 0, "min_stock": 1, "is_active": false}),
            ],
        );

        let low = source.low_stock_products().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0]["id"], "p1");
    }

    #[tokio::test]
    async fn test_save_invoice_adjusts_stock() {
        let source = InMemoryDataSource::new();
        source.insert_all(
            EntityType::Products,
            vec![json!({"id": "p1", "stock": 10, "min_stock": 3})],
        );

        source
            .save_invoice(json!({"items": [{"product_id": "p1", "quantity": 8}]}))
            .await
            .unwrap();
        assert_eq!(source.rows(EntityType::Products)[0]["stock"], 2);
    }

    #[tokio::test]
    async fn test_user_activity_latest_first() {
        let source = InMemoryDataSource::new();
        source.insert_all(
            EntityType::UserActivity,
            (0..150).map(|ts| json!({"timestamp": ts})).collect(),
        );

        let activity = source.user_activity().await.unwrap();
        assert_eq!(activity.len(), USER_ACTIVITY_LIMIT);
        assert_eq!(activity[0]["timestamp"], 149);
    }
}
