//! Expiring, capacity-bounded backend over a [`KeyValueStore`].

use super::KeyValueStore;
use crate::error::Result;
use crate::serialization::{decode_entry, encode_entry, CacheEntry};
use serde_json::Value;
use std::time::Duration;

/// Result of a bounded-store write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written on the first attempt.
    Stored,
    /// Written after evicting this many entries.
    StoredAfterEviction(usize),
    /// Quota still exhausted after eviction; nothing was written.
    Rejected,
}

impl WriteOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, WriteOutcome::Rejected)
    }
}

/// One namespaced entry as seen by the stats scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedItem {
    /// Key with the namespace stripped: `{entity_type}_{key}`.
    pub key: String,
    /// Serialized size in bytes.
    pub size: usize,
}

/// Bounded backend: JSON entries with lazy expiry and quota eviction.
///
/// Every key it touches starts with the configured namespace; other keys in
/// the underlying store are left alone.
pub struct BoundedBackend<S: KeyValueStore> {
    store: S,
    namespace: String,
    version: u32,
    eviction_fraction: f64,
}

impl<S: KeyValueStore> BoundedBackend<S> {
    pub fn new(store: S, namespace: impl Into<String>, version: u32, eviction_fraction: f64) -> Self {
        BoundedBackend {
            store,
            namespace: namespace.into(),
            version,
            eviction_fraction,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read a live entry.
    ///
    /// Expired, unreadable and outdated entries are deleted and reported as `None`.
    ///
    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn get(&self, storage_key: &str, now_ms: u64) -> Result<Option<Value>> {
        let Some(raw) = self.store.get_item(storage_key)? else {
            return Ok(None);
        };

        match decode_entry(&raw, self.version) {
            Ok(entry) if entry.is_expired(now_ms) => {
                debug!("Bounded GET {} -> EXPIRED", storage_key);
                self.store.remove_item(storage_key)?;
                Ok(None)
            }
            Ok(entry) => Ok(Some(entry.data)),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", storage_key, e);
                self.store.remove_item(storage_key)?;
                Ok(None)
            }
        }
    }

    /// Write an entry that expires `ttl` after `now_ms`.
    ///
    /// When the store reports its quota exhausted, the oldest entries are
    /// evicted and the write is retried once. A failed retry is logged and
    /// reported as [`WriteOutcome::Rejected`], never as an error.
    ///
    /// # Errors
    /// Returns `Err` if the entry cannot be serialized or the store fails for
    /// a reason other than its quota.
    pub fn set(&self, storage_key: &str, data: Value, ttl: Duration, now_ms: u64) -> Result<WriteOutcome> {
        let entry = CacheEntry::new(data, now_ms, ttl.as_millis() as u64, self.version);
        let raw = encode_entry(&entry)?;

        match self.store.set_item(storage_key, raw.clone()) {
            Ok(()) => Ok(WriteOutcome::Stored),
            Err(e) if e.is_quota_exceeded() => {
                let evicted = self.evict_oldest()?;
                warn!(
                    "Quota exceeded writing {}, evicted {} entries",
                    storage_key, evicted
                );

                match self.store.set_item(storage_key, raw) {
                    Ok(()) => Ok(WriteOutcome::StoredAfterEviction(evicted)),
                    Err(retry) => {
                        warn!("Failed to cache {} after eviction: {}", storage_key, retry);
                        Ok(WriteOutcome::Rejected)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn remove(&self, storage_key: &str) -> Result<()> {
        self.store.remove_item(storage_key)
    }

    /// Remove every entry whose key starts with `prefix`; returns how many.
    ///
    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let keys: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();

        for key in &keys {
            self.store.remove_item(key)?;
        }
        Ok(keys.len())
    }

    /// Remove every namespaced entry.
    ///
    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.remove_prefix(&self.namespace)?;
        debug!("Bounded CLEAR {} -> {} entries", self.namespace, removed);
        Ok(removed)
    }

    /// Drop the oldest `eviction_fraction` of namespaced entries (rounded up),
    /// ordered by creation timestamp. Unreadable entries found during the scan
    /// are dropped as well and count towards the total.
    ///
    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn evict_oldest(&self) -> Result<usize> {
        let mut dated: Vec<(String, u64)> = Vec::new();
        let mut removed = 0;

        for key in self.namespaced_keys()? {
            let Some(raw) = self.store.get_item(&key)? else {
                continue;
            };
            match decode_entry(&raw, self.version) {
                Ok(entry) => dated.push((key, entry.timestamp)),
                Err(_) => {
                    self.store.remove_item(&key)?;
                    removed += 1;
                }
            }
        }

        dated.sort_by_key(|(_, timestamp)| *timestamp);
        let count = (dated.len() as f64 * self.eviction_fraction).ceil() as usize;

        for (key, _) in dated.iter().take(count) {
            self.store.remove_item(key)?;
            debug!("Bounded EVICT {}", key);
        }

        Ok(removed + count.min(dated.len()))
    }

    /// Namespaced entries with their serialized size, for stats.
    ///
    /// Entries that are not valid JSON entries are skipped.
    ///
    /// # Errors
    /// Returns `Err` if the underlying store fails.
    pub fn items(&self) -> Result<Vec<BoundedItem>> {
        let mut items = Vec::new();

        for key in self.namespaced_keys()? {
            let Some(raw) = self.store.get_item(&key)? else {
                continue;
            };
            if serde_json::from_str::<CacheEntry>(&raw).is_err() {
                continue;
            }
            items.push(BoundedItem {
                key: key[self.namespace.len()..].to_string(),
                size: raw.len(),
            });
        }

        Ok(items)
    }

    fn namespaced_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&self.namespace))
            .collect())
    }
}
