//! In-memory object store: named collections of byte records.

use super::ObjectStore;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type Collection = DashMap<String, Vec<u8>>;

/// Thread-safe in-memory [`ObjectStore`].
///
/// Collections only exist after [`open`](ObjectStore::open) created them;
/// touching an unknown collection is a `BackendError`, as with a real object
/// store. Clones share the same collections.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    collections: Arc<DashMap<String, Arc<Collection>>>,
    opens: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `open` was called.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent `open` calls fail, simulating a blocked connection.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Raw record bytes, bypassing the cache layer.
    pub fn raw(&self, collection: &str, key: &str) -> Option<Vec<u8>> {
        let records = self.collection(collection).ok()?;
        let value = records.get(key).map(|v| v.value().clone());
        value
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::BackendError(format!("Object store has no collection {}", name)))
    }
}

impl ObjectStore for InMemoryObjectStore {
    async fn open(&self, collections: &[String]) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::BackendError("Object store open failed".to_string()));
        }

        for name in collections {
            self.collections
                .entry(name.clone())
                .or_insert_with(|| Arc::new(DashMap::new()));
        }

        debug!("✓ ObjectStore OPEN ({} collections)", collections.len());
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let records = self.collection(collection)?;
        let value = records.get(key).map(|v| v.value().clone());
        Ok(value)
    }

    async fn put(&self, collection: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.collection(collection)?.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.collection(collection)?.remove(key);
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        self.collection(collection)?.clear();
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.collection(collection)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryObjectStore::new();
        store.open(&names(&["customers"])).await.unwrap();

        store.put("customers", "default", vec![1, 2]).await.unwrap();
        assert_eq!(
            store.get("customers", "default").await.unwrap(),
            Some(vec![1, 2])
        );

        store.delete("customers", "default").await.unwrap();
        assert_eq!(store.get("customers", "default").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_error() {
        let store = InMemoryObjectStore::new();
        let result = store.get("customers", "default").await;
        assert!(matches!(result, Err(Error::BackendError(_))));
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let store = InMemoryObjectStore::new();
        store.open(&names(&["invoices"])).await.unwrap();
        store.put("invoices", "k", vec![9]).await.unwrap();

        store.open(&names(&["invoices", "payments"])).await.unwrap();
        assert_eq!(store.count("invoices").await.unwrap(), 1);
        assert_eq!(store.collection_names(), names(&["invoices", "payments"]));
        assert_eq!(store.open_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_and_count() {
        let store = InMemoryObjectStore::new();
        store.open(&names(&["products"])).await.unwrap();
        store.put("products", "a", vec![]).await.unwrap();
        store.put("products", "b", vec![]).await.unwrap();
        assert_eq!(store.count("products").await.unwrap(), 2);

        store.clear("products").await.unwrap();
        assert_eq!(store.count("products").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_open() {
        let store = InMemoryObjectStore::new();
        store.set_fail_open(true);
        assert!(store.open(&names(&["products"])).await.is_err());
        assert_eq!(store.open_count(), 1);
    }
}
