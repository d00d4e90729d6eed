//! Read-through and invalidate-after wrappers around remote calls.
//!
//! [`with_cache`] turns a fetch function into a [`CachedFetch`] that serves
//! repeated calls from the cache. [`with_cache_invalidation`] turns a mutation
//! into an [`InvalidatingMutation`] that drops the affected entity types once
//! the mutation succeeds.
//!
//! Both wrappers put the remote call first: cache failures are logged and
//! the call proceeds as if uncached, while errors from the wrapped function
//! are returned unchanged.

use crate::backend::{KeyValueStore, ObjectStore};
use crate::key::{JsonArgsKey, KeyFn};
use crate::manager::CacheManager;
use crate::strategy::CacheStrategy;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Serve `(entity_type, key)` from the cache according to `strategy`,
/// falling back to `fetch`.
///
/// A fresh result is written back under the entity type's TTL. If `fetch`
/// fails its error is returned and nothing is cached.
pub async fn read_through<S, O, T, E, F, Fut>(
    manager: &CacheManager<S, O>,
    entity_type: &str,
    key: &str,
    strategy: CacheStrategy,
    fetch: F,
) -> Result<T, E>
where
    S: KeyValueStore,
    O: ObjectStore,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    debug!(
        "» Read-through {}_{} (strategy: {})",
        entity_type, key, strategy
    );

    if strategy == CacheStrategy::Invalidate {
        if let Err(e) = manager.invalidate(entity_type, key).await {
            warn!("Failed to invalidate {}_{}: {}", entity_type, key, e);
        }
    }

    if strategy.reads_cache() {
        match manager.get_as::<T>(entity_type, key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!(
                "Cache read failed for {}_{}, fetching uncached: {}",
                entity_type, key, e
            ),
        }
    }

    let fresh = fetch().await?;
    store_fresh(manager, entity_type, key, &fresh).await;
    Ok(fresh)
}

/// Await `mutation`; on success invalidate every type in `entity_types`
/// concurrently.
///
/// Invalidation failures are logged and never replace the mutation result.
/// A failed mutation invalidates nothing.
pub async fn invalidate_after<S, O, N, T, E, Fut>(
    manager: &CacheManager<S, O>,
    entity_types: &[N],
    mutation: Fut,
) -> Result<T, E>
where
    S: KeyValueStore,
    O: ObjectStore,
    N: AsRef<str>,
    Fut: Future<Output = Result<T, E>>,
{
    let result = mutation.await?;

    let outcomes =
        join_all(entity_types.iter().map(|t| manager.invalidate_type(t.as_ref()))).await;
    for (entity_type, outcome) in entity_types.iter().zip(outcomes) {
        match outcome {
            Ok(()) => debug!("Invalidated {} after mutation", entity_type.as_ref()),
            Err(e) => warn!(
                "Failed to invalidate {} after mutation: {}",
                entity_type.as_ref(),
                e
            ),
        }
    }

    Ok(result)
}

pub(crate) async fn store_fresh<S, O, T>(
    manager: &CacheManager<S, O>,
    entity_type: &str,
    key: &str,
    fresh: &T,
) where
    S: KeyValueStore,
    O: ObjectStore,
    T: Serialize,
{
    match manager.set_as(entity_type, fresh, key).await {
        Ok(true) => {}
        Ok(false) => debug!("Fresh {}_{} was not cached", entity_type, key),
        Err(e) => warn!("Failed to cache {}_{}: {}", entity_type, key, e),
    }
}

/// Fetch function with read-through caching. See [`with_cache`].
pub struct CachedFetch<S: KeyValueStore, O: ObjectStore, F, A> {
    manager: Arc<CacheManager<S, O>>,
    entity_type: String,
    fetch: F,
    key_fn: Box<dyn KeyFn<A>>,
}

/// Wrap `fetch` so each call is keyed by its arguments and served from the
/// cache while the entry is live.
///
/// The key is the JSON encoding of the argument tuple: `()` uses the
/// `"default"` slot, `(5,)` the `"[5]"` slot. Install another derivation
/// with [`CachedFetch::with_key_fn`].
///
/// ```
/// use backoffice_cache::{fetch::with_cache, CacheConfig, CacheManager, EntityType};
/// use std::sync::Arc;
///
/// let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
/// let low_stock = with_cache(cache, EntityType::LowStockProducts, |(threshold,): (u32,)| async move {
///     Ok::<_, String>(vec![format!("below {}", threshold)])
/// });
/// # let _ = low_stock;
/// ```
pub fn with_cache<S, O, F, A, Fut>(
    manager: Arc<CacheManager<S, O>>,
    entity_type: impl AsRef<str>,
    fetch: F,
) -> CachedFetch<S, O, F, A>
where
    S: KeyValueStore,
    O: ObjectStore,
    A: Serialize + 'static,
    F: Fn(A) -> Fut,
    Fut: Future,
{
    CachedFetch::new(manager, entity_type, fetch, JsonArgsKey)
}

impl<S: KeyValueStore, O: ObjectStore, F, A: 'static> CachedFetch<S, O, F, A> {
    /// Wrap `fetch` with an explicit key derivation, for argument types that
    /// are not `Serialize`.
    pub fn new(
        manager: Arc<CacheManager<S, O>>,
        entity_type: impl AsRef<str>,
        fetch: F,
        key_fn: impl KeyFn<A> + 'static,
    ) -> Self {
        CachedFetch {
            manager,
            entity_type: entity_type.as_ref().to_string(),
            fetch,
            key_fn: Box::new(key_fn),
        }
    }

    pub fn with_key_fn(mut self, key_fn: impl KeyFn<A> + 'static) -> Self {
        self.key_fn = Box::new(key_fn);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Call through the cache.
    ///
    /// # Errors
    ///
    /// Returns the wrapped function's error unchanged. Cache failures never
    /// surface here.
    pub async fn call<T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        match self.key_fn.derive(&args) {
            Ok(key) => {
                read_through(
                    &self.manager,
                    &self.entity_type,
                    &key,
                    CacheStrategy::Refresh,
                    || (self.fetch)(args),
                )
                .await
            }
            Err(e) => {
                warn!(
                    "No cache key for {} call, fetching uncached: {}",
                    self.entity_type, e
                );
                (self.fetch)(args).await
            }
        }
    }
}

/// Mutation that invalidates entity types on success. See [`with_cache_invalidation`].
pub struct InvalidatingMutation<S: KeyValueStore, O: ObjectStore, F> {
    manager: Arc<CacheManager<S, O>>,
    entity_types: Vec<String>,
    mutate: F,
}

/// Wrap `mutate` so that every key of `entity_type` is dropped after each
/// successful call.
pub fn with_cache_invalidation<S, O, F>(
    manager: Arc<CacheManager<S, O>>,
    entity_type: impl AsRef<str>,
    mutate: F,
) -> InvalidatingMutation<S, O, F>
where
    S: KeyValueStore,
    O: ObjectStore,
{
    InvalidatingMutation {
        manager,
        entity_types: vec![entity_type.as_ref().to_string()],
        mutate,
    }
}

impl<S: KeyValueStore, O: ObjectStore, F> InvalidatingMutation<S, O, F> {
    /// Also drop `entity_type` after a successful call.
    pub fn also_invalidates(mut self, entity_type: impl AsRef<str>) -> Self {
        let entity_type = entity_type.as_ref().to_string();
        if !self.entity_types.contains(&entity_type) {
            self.entity_types.push(entity_type);
        }
        self
    }

    pub fn entity_types(&self) -> &[String] {
        &self.entity_types
    }

    /// Run the mutation, then invalidate.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error unchanged; nothing is invalidated in that case.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        invalidate_after(&self.manager, &self.entity_types, (self.mutate)(args)).await
    }
}
