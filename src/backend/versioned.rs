//! Versioned record backend over an [`ObjectStore`].

use super::ObjectStore;
use crate::error::{Error, Result};
use crate::serialization::{decode_record, encode_record, StoredRecord};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Object-store backend: one collection per entity type, records keyed by
/// the slot key alone.
///
/// The store is opened lazily by the first operation. Concurrent first
/// callers wait for the same open; later callers reuse it. A failed open is
/// not remembered, so the next operation tries again.
pub struct VersionedBackend<O: ObjectStore> {
    store: O,
    collections: Vec<String>,
    version: u32,
    ready: OnceCell<()>,
}

impl<O: ObjectStore> VersionedBackend<O> {
    pub fn new(store: O, collections: Vec<String>, version: u32) -> Self {
        VersionedBackend {
            store,
            collections,
            version,
            ready: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    /// Open the store once.
    ///
    /// # Errors
    /// Returns `Err` if the store cannot be opened.
    pub async fn init(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.store.open(&self.collections).await?;
                info!(
                    "✓ Object store initialized ({} collections)",
                    self.collections.len()
                );
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Read a live record's payload.
    ///
    /// Expired, unreadable and outdated records are deleted and reported as `None`.
    ///
    /// # Errors
    /// Returns `Err` if the store cannot be opened or fails.
    pub async fn get(&self, collection: &str, key: &str, now_ms: u64) -> Result<Option<Value>> {
        self.init().await?;

        let Some(bytes) = self.store.get(collection, key).await? else {
            return Ok(None);
        };

        match decode_record(&bytes, self.version) {
            Ok(record) if record.is_expired(now_ms) => {
                debug!("ObjectStore GET {}/{} -> EXPIRED", collection, key);
                self.store.delete(collection, key).await?;
                Ok(None)
            }
            Ok(record) => Ok(Some(record.data)),
            Err(e) => {
                warn!(
                    "Discarding unreadable cache record {}/{}: {}",
                    collection, key, e
                );
                self.store.delete(collection, key).await?;
                Ok(None)
            }
        }
    }

    /// Upsert a record that expires `ttl` after `now_ms`.
    ///
    /// # Errors
    /// Returns `Err` if the record cannot be encoded or the store fails.
    pub async fn set(
        &self,
        collection: &str,
        key: &str,
        data: Value,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<bool> {
        self.init().await?;

        let record = StoredRecord::new(key, data, now_ms, ttl.as_millis() as u64, self.version);
        let bytes = encode_record(&record)?;
        self.store.put(collection, key, bytes).await?;
        Ok(true)
    }

    /// # Errors
    /// Returns `Err` if the store cannot be opened or fails.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.init().await?;
        self.store.delete(collection, key).await
    }

    /// # Errors
    /// Returns `Err` if the store cannot be opened or fails.
    pub async fn clear(&self, collection: &str) -> Result<()> {
        self.init().await?;
        self.store.clear(collection).await
    }

    /// # Errors
    /// Returns `Err` if the store cannot be opened or fails.
    pub async fn count(&self, collection: &str) -> Result<usize> {
        self.init().await?;
        self.store.count(collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryObjectStore;
    use serde_json::json;

    fn backend(store: InMemoryObjectStore) -> VersionedBackend<InMemoryObjectStore> {
        VersionedBackend::new(
            store,
            vec!["customers".to_string(), "invoices".to_string()],
            1,
        )
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let backend = backend(InMemoryObjectStore::new());
        backend
            .set("customers", "default", json!([{"id": 1}]), Duration::from_secs(60), 0)
            .await
            .unwrap();

        assert_eq!(
            backend.get("customers", "default", 10).await.unwrap(),
            Some(json!([{"id": 1}]))
        );
    }

    #[tokio::test]
    async fn test_init_is_memoized() {
        let store = InMemoryObjectStore::new();
        let backend = backend(store.clone());

        let (a, b, c) = tokio::join!(
            backend.get("customers", "default", 0),
            backend.get("invoices", "default", 0),
            backend.count("customers"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        backend.delete("customers", "default").await.unwrap();

        assert_eq!(store.open_count(), 1);
        assert!(backend.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let store = InMemoryObjectStore::new();
        store.set_fail_open(true);
        let backend = backend(store.clone());

        assert!(matches!(
            backend.get("customers", "default", 0).await,
            Err(Error::BackendError(_))
        ));
        assert!(!backend.is_initialized());

        store.set_fail_open(false);
        assert_eq!(backend.get("customers", "default", 0).await.unwrap(), None);
        assert_eq!(store.open_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_record_is_deleted() {
        let store = InMemoryObjectStore::new();
        let backend = backend(store.clone());
        backend
            .set("invoices", "default", json!([]), Duration::from_millis(100), 1_000)
            .await
            .unwrap();

        assert!(backend.get("invoices", "default", 1_099).await.unwrap().is_some());
        assert!(backend.get("invoices", "default", 1_100).await.unwrap().is_none());
        assert!(store.raw("invoices", "default").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_miss() {
        let store = InMemoryObjectStore::new();
        let backend = backend(store.clone());
        backend.init().await.unwrap();
        store.put("customers", "default", vec![0xff, 0x00]).await.unwrap();

        assert_eq!(backend.get("customers", "default", 0).await.unwrap(), None);
        assert!(store.raw("customers", "default").is_none());
    }

    #[tokio::test]
    async fn test_outdated_version_is_a_miss() {
        let store = InMemoryObjectStore::new();
        let old = VersionedBackend::new(store.clone(), vec!["customers".to_string()], 0);
        old.set("customers", "default", json!(1), Duration::from_secs(60), 0)
            .await
            .unwrap();

        let current = backend(store);
        assert_eq!(current.get("customers", "default", 1).await.unwrap(), None);
    }
}
