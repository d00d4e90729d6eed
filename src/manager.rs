//! Cache manager: routes each entity type to its backend under its TTL policy.

use crate::backend::{
    BoundedBackend, InMemoryObjectStore, KeyValueStore, MemoryKeyValueStore, ObjectStore,
    VersionedBackend, WriteOutcome,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entity::{EntityPolicy, StorageKind};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::stats::CacheStats;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Routing and policy layer over the two backends.
///
/// Each configured entity type lives in exactly one backend. Types missing
/// from the [`CacheConfig`] are soft no-ops: reads miss and writes are
/// dropped, both with a warning.
///
/// The manager is shared by reference (or `Arc`); every method takes `&self`.
///
/// # Example
///
/// ```
/// use backoffice_cache::{CacheConfig, CacheManager, EntityType};
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let cache = CacheManager::in_memory(CacheConfig::default());
///
/// cache.set(EntityType::Users, json!([{"id": 1}]), "default").await.unwrap();
/// assert!(cache.is_valid(EntityType::Users, "default").await.unwrap());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct CacheManager<S: KeyValueStore = MemoryKeyValueStore, O: ObjectStore = InMemoryObjectStore>
{
    config: Arc<CacheConfig>,
    bounded: BoundedBackend<S>,
    versioned: VersionedBackend<O>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn CacheMetrics>,
    monitoring: AtomicBool,
}

impl CacheManager<MemoryKeyValueStore, InMemoryObjectStore> {
    /// Manager over fresh unbounded in-memory stores.
    pub fn in_memory(config: CacheConfig) -> Self {
        CacheManager::new(config, MemoryKeyValueStore::new(), InMemoryObjectStore::new())
    }
}

impl<S: KeyValueStore, O: ObjectStore> CacheManager<S, O> {
    /// Create a manager over the given raw stores.
    ///
    /// The object store is opened lazily, with one collection per entity type
    /// routed to it. The configuration is taken as is; use
    /// [`try_new`](Self::try_new) for one that was not built by `from_env`.
    pub fn new(config: CacheConfig, kv: S, objects: O) -> Self {
        let bounded = BoundedBackend::new(
            kv,
            config.namespace.clone(),
            config.schema_version,
            config.eviction_fraction,
        );
        let versioned = VersionedBackend::new(
            objects,
            config.entities_in(StorageKind::ObjectStore),
            config.schema_version,
        );

        CacheManager {
            config: Arc::new(config),
            bounded,
            versioned,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
            monitoring: AtomicBool::new(false),
        }
    }

    /// Like [`new`](Self::new), but rejects a configuration that fails
    /// [`CacheConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for an empty namespace, an entity type name
    /// that is empty or contains `_`, or an out-of-range eviction fraction or jitter.
    pub fn try_new(config: CacheConfig, kv: S, objects: O) -> Result<Self> {
        config.validate()?;
        Ok(CacheManager::new(config, kv, objects))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self, entity_type: impl AsRef<str>) -> Option<&EntityPolicy> {
        self.config.policy(entity_type.as_ref())
    }

    pub fn bounded_store(&self) -> &S {
        self.bounded.store()
    }

    pub fn object_store(&self) -> &O {
        self.versioned.store()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Log every operation at `info` while enabled.
    pub fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::Relaxed);
        info!(
            "Cache monitoring {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    /// Read a live entry.
    ///
    /// Returns `Ok(None)` for a miss, an expired entry, or an unconfigured
    /// entity type.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the backing store fails or the object
    /// store cannot be opened.
    pub async fn get(&self, entity_type: impl AsRef<str>, key: &str) -> Result<Option<Value>> {
        let entity_type = entity_type.as_ref();
        let timer = Instant::now();

        let Some(policy) = self.config.policy(entity_type) else {
            warn!("Cache GET for unconfigured entity type {}", entity_type);
            return Ok(None);
        };

        let cache_key = CacheKey::new(entity_type, key);
        let full = cache_key.full();
        let now = self.clock.now_ms();

        let result = match policy.storage {
            StorageKind::Bounded => self
                .bounded
                .get(&cache_key.storage_key(&self.config.namespace), now),
            StorageKind::ObjectStore => self.versioned.get(entity_type, key, now).await,
        };

        match &result {
            Ok(Some(_)) => {
                self.metrics.record_hit(&full, timer.elapsed());
                self.monitor("GET", &full, "HIT");
            }
            Ok(None) => {
                self.metrics.record_miss(&full, timer.elapsed());
                self.monitor("GET", &full, "MISS");
            }
            Err(e) => self.metrics.record_error(&full, &e.to_string()),
        }

        result
    }

    /// Store `data` under `(entity_type, key)` with the type's TTL.
    ///
    /// Returns `Ok(false)` when nothing was written: the entity type is not
    /// configured, or the bounded store stayed full after eviction.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the payload cannot be encoded or the backing store fails.
    pub async fn set(&self, entity_type: impl AsRef<str>, data: Value, key: &str) -> Result<bool> {
        let entity_type = entity_type.as_ref();
        let timer = Instant::now();

        let Some(policy) = self.config.policy(entity_type) else {
            warn!("Cache SET for unconfigured entity type {}", entity_type);
            return Ok(false);
        };

        let cache_key = CacheKey::new(entity_type, key);
        let full = cache_key.full();
        let ttl = self.config.effective_ttl(&full, policy.ttl);
        let now = self.clock.now_ms();

        let result = match policy.storage {
            StorageKind::Bounded => self
                .bounded
                .set(&cache_key.storage_key(&self.config.namespace), data, ttl, now)
                .map(|outcome| {
                    if let WriteOutcome::StoredAfterEviction(evicted) = outcome {
                        self.metrics.record_eviction(evicted);
                    }
                    outcome.is_stored()
                }),
            StorageKind::ObjectStore => self.versioned.set(entity_type, key, data, ttl, now).await,
        };

        match &result {
            Ok(stored) => {
                self.metrics.record_set(&full, *stored, timer.elapsed());
                self.monitor("SET", &full, if *stored { "STORED" } else { "DROPPED" });
            }
            Err(e) => self.metrics.record_error(&full, &e.to_string()),
        }

        result
    }

    /// Delete one slot. Absent slots and unconfigured types are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backing store fails.
    pub async fn invalidate(&self, entity_type: impl AsRef<str>, key: &str) -> Result<()> {
        let entity_type = entity_type.as_ref();
        let Some(policy) = self.config.policy(entity_type) else {
            return Ok(());
        };

        let cache_key = CacheKey::new(entity_type, key);
        let full = cache_key.full();

        let result = match policy.storage {
            StorageKind::Bounded => self
                .bounded
                .remove(&cache_key.storage_key(&self.config.namespace)),
            StorageKind::ObjectStore => self.versioned.delete(entity_type, key).await,
        };

        match &result {
            Ok(()) => {
                self.metrics.record_invalidate(&full);
                self.monitor("INVALIDATE", &full, "OK");
            }
            Err(e) => self.metrics.record_error(&full, &e.to_string()),
        }

        result
    }

    /// Delete every slot of an entity type, whatever its key.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backing store fails.
    pub async fn invalidate_type(&self, entity_type: impl AsRef<str>) -> Result<()> {
        let entity_type = entity_type.as_ref();
        let Some(policy) = self.config.policy(entity_type) else {
            return Ok(());
        };

        let result = match policy.storage {
            StorageKind::Bounded => self
                .bounded
                .remove_prefix(&CacheKey::type_prefix(&self.config.namespace, entity_type))
                .map(|removed| debug!("Bounded INVALIDATE {} -> {} entries", entity_type, removed)),
            StorageKind::ObjectStore => self.versioned.clear(entity_type).await,
        };

        match &result {
            Ok(()) => {
                self.metrics.record_invalidate(entity_type);
                self.monitor("INVALIDATE", entity_type, "ALL");
            }
            Err(e) => self.metrics.record_error(entity_type, &e.to_string()),
        }

        result
    }

    /// Drop every namespaced bounded entry and every object-store record.
    ///
    /// Keys outside the namespace are untouched.
    ///
    /// # Errors
    ///
    /// Returns `Err` if either backing store fails.
    pub async fn clear_all(&self) -> Result<()> {
        let removed = self.bounded.clear()?;

        for collection in self.versioned.collections() {
            self.versioned.clear(collection).await?;
        }

        info!(
            "✓ Cache cleared ({} bounded entries, {} collections)",
            removed,
            self.versioned.collections().len()
        );
        Ok(())
    }

    /// Whether a live entry exists for the slot.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn is_valid(&self, entity_type: impl AsRef<str>, key: &str) -> Result<bool> {
        Ok(self.get(entity_type, key).await?.is_some())
    }

    /// Typed read. A payload that does not decode as `T` counts as a miss.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        entity_type: impl AsRef<str>,
        key: &str,
    ) -> Result<Option<T>> {
        let entity_type = entity_type.as_ref();
        let Some(value) = self.get(entity_type, key).await? else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(typed) => Ok(Some(typed)),
            Err(e) => {
                warn!(
                    "Cached {}_{} does not match the requested type: {}",
                    entity_type, key, e
                );
                Ok(None)
            }
        }
    }

    /// Typed write.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if `data` cannot be represented as
    /// JSON, otherwise the same as [`set`](Self::set).
    pub async fn set_as<T: Serialize>(
        &self,
        entity_type: impl AsRef<str>,
        data: &T,
        key: &str,
    ) -> Result<bool> {
        let value = serde_json::to_value(data).map_err(|e| {
            error!("Failed to serialize cache payload: {}", e);
            Error::SerializationError(e.to_string())
        })?;
        self.set(entity_type, value, key).await
    }

    /// Per-entity counts and sizes across both backends.
    ///
    /// Bounded entries that are not valid cache entries are skipped.
    /// Object-store counts include records that have expired but were not
    /// read since.
    ///
    /// # Errors
    ///
    /// Returns `Err` if either backing store fails.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        let bounded_types = self.config.entities_in(StorageKind::Bounded);

        for item in self.bounded.items()? {
            let entity_type = entity_type_of(&item.key, &bounded_types);
            stats.add_bounded(entity_type, item.size);
        }

        for collection in self.versioned.collections() {
            let count = self.versioned.count(collection).await?;
            stats.set_object_count(collection, count);
        }

        Ok(stats)
    }

    fn monitor(&self, op: &str, key: &str, outcome: &str) {
        if self.is_monitoring() {
            info!("[cache] {} {} -> {}", op, key, outcome);
        }
    }
}

/// Entity type of a composite `{entity_type}_{key}`.
///
/// Configured types are matched by prefix first; otherwise the text before
/// the first `_` is used.
fn entity_type_of<'a>(full_key: &'a str, known: &'a [String]) -> &'a str {
    known
        .iter()
        .find(|t| {
            full_key.len() > t.len()
                && full_key.starts_with(t.as_str())
                && full_key.as_bytes()[t.len()] == b'_'
        })
        .map(|t| t.as_str())
        .unwrap_or_else(|| full_key.split('_').next().unwrap_or(full_key))
}
