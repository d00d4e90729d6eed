//! In-memory string key/value store with an optional byte quota.
//!
//! Uses DashMap for concurrent access; clones share the same map.

use super::KeyValueStore;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Thread-safe in-memory [`KeyValueStore`].
///
/// With a capacity set, a write that would push the total size (key bytes plus
/// value bytes over all items) past it fails with `Error::QuotaExceeded`, the
/// same way browser local storage rejects writes once its quota is used up.
///
/// # Example
///
/// ```
/// use backoffice_cache::backend::{KeyValueStore, MemoryKeyValueStore};
///
/// let store = MemoryKeyValueStore::with_capacity(16);
/// store.set_item("a", "1234".to_string()).unwrap();
/// assert!(store.set_item("b", "x".repeat(32)).is_err());
/// ```
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    items: Arc<DashMap<String, String>>,
    capacity: Option<usize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryKeyValueStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes beyond `capacity_bytes`.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        MemoryKeyValueStore {
            capacity: Some(capacity_bytes),
            ..Self::default()
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Bytes used by all items (keys plus values).
    pub fn used_bytes(&self) -> usize {
        self.items
            .iter()
            .map(|item| item.key().len() + item.value().len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Simulate the store becoming unreachable; every call then fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendError(
                "key/value store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.check_available()?;

        if let Some(capacity) = self.capacity {
            let replaced = self
                .items
                .get(key)
                .map(|v| key.len() + v.value().len())
                .unwrap_or(0);
            let needed = self.used_bytes().saturating_sub(replaced) + key.len() + value.len();

            if needed > capacity {
                return Err(Error::QuotaExceeded(format!(
                    "writing {} needs {} bytes, capacity is {}",
                    key, needed, capacity
                )));
            }
        }

        self.items.insert(key.to_string(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.items.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.items.iter().map(|item| item.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryKeyValueStore::new();

        store.set_item("k", "v".to_string()).unwrap();
        assert_eq!(store.get_item("k").unwrap(), Some("v".to_string()));

        store.remove_item("k").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
        store.remove_item("k").unwrap();
    }

    #[test]
    fn test_quota_counts_keys_and_values() {
        let store = MemoryKeyValueStore::with_capacity(10);

        store.set_item("ab", "cdef".to_string()).unwrap();
        assert_eq!(store.used_bytes(), 6);

        let err = store.set_item("gh", "ijk".to_string()).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_quota_allows_replacing_in_place() {
        let store = MemoryKeyValueStore::with_capacity(10);

        store.set_item("ab", "cdefghij".to_string()).unwrap();
        store.set_item("ab", "12345678".to_string()).unwrap();
        assert_eq!(store.get_item("ab").unwrap(), Some("12345678".to_string()));
    }

    #[test]
    fn test_unavailable_store_errors() {
        let store = MemoryKeyValueStore::new();
        store.set_available(false);

        assert!(matches!(store.get_item("k"), Err(Error::BackendError(_))));
        assert!(store.keys().is_err());

        store.set_available(true);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_items() {
        let store = MemoryKeyValueStore::new();
        let other = store.clone();

        store.set_item("k", "v".to_string()).unwrap();
        assert_eq!(other.get_item("k").unwrap(), Some("v".to_string()));
    }
}
