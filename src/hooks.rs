//! Component-style data handles bound to the cache.
//!
//! A [`CachedData`] owns one `(entity_type, key)` slot and a fetch function.
//! It loads on [`mount`](CachedData::mount), reloads on demand, and publishes
//! its [`LoadState`] through a `tokio::sync::watch` channel.
//!
//! Two guards protect the handle's own state:
//!
//! - **mounted**: once [`unmount`](CachedData::unmount) is called, results
//!   that arrive later are not published. The fetch itself is not aborted
//!   and its result is still written to the cache.
//! - **busy**: a load that starts while another is in flight returns
//!   immediately without fetching.
//!
//! [`MultiCachedData`] fans out over several sources at once and keeps
//! per-source results and errors apart, so one failing source never hides
//! the others.

use crate::backend::{InMemoryObjectStore, KeyValueStore, MemoryKeyValueStore, ObjectStore};
use crate::error::{Error, Result};
use crate::fetch::store_fresh;
use crate::key::DEFAULT_KEY;
use crate::manager::CacheManager;
use crate::strategy::CacheStrategy;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Published state of a [`CachedData`] handle.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadState<T> {
    /// Not loaded yet (or disabled).
    Idle,
    /// A load is in flight. `previous` keeps the last successful data so
    /// a refresh does not blank the handle.
    Loading { previous: Option<T> },
    Success(T),
    Failed(Error),
}

impl<T> LoadState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading { .. })
    }

    /// Latest successful data, including while a refresh is in flight.
    pub fn data(&self) -> Option<&T> {
        match self {
            LoadState::Success(data) => Some(data),
            LoadState::Loading { previous } => previous.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            LoadState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Options for a [`CachedData`] handle.
pub struct CachedDataOptions<T> {
    /// Slot key within the entity type. Defaults to `"default"`.
    pub key: String,
    /// A disabled handle never loads.
    pub enabled: bool,
    /// Skip the cache read on every load; results are still written through.
    pub force_refresh: bool,
    /// Fetch timeout. `None` falls back to [`CacheConfig::fetch_timeout`](crate::CacheConfig).
    pub timeout: Option<Duration>,
    pub on_success: Option<SuccessCallback<T>>,
    pub on_error: Option<ErrorCallback>,
}

impl<T> Default for CachedDataOptions<T> {
    fn default() -> Self {
        CachedDataOptions {
            key: DEFAULT_KEY.to_string(),
            enabled: true,
            force_refresh: false,
            timeout: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> CachedDataOptions<T> {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl<T> fmt::Debug for CachedDataOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDataOptions")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("force_refresh", &self.force_refresh)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Clears the flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolve one slot: optional cache read, then a bounded fetch written
/// through to the cache.
async fn resolve<S, O, T, F, Fut>(
    cache: &CacheManager<S, O>,
    entity_type: &str,
    key: &str,
    strategy: CacheStrategy,
    timeout: Option<Duration>,
    fetch: F,
) -> Result<T>
where
    S: KeyValueStore,
    O: ObjectStore,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if strategy.reads_cache() {
        if let Some(cached) = cache.get_as::<T>(entity_type, key).await? {
            return Ok(cached);
        }
    }

    let fresh = match timeout {
        Some(limit) => tokio::time::timeout(limit, fetch())
            .await
            .map_err(|_| Error::Timeout(format!("{} fetch exceeded {:?}", entity_type, limit)))??,
        None => fetch().await?,
    };

    store_fresh(cache, entity_type, key, &fresh).await;
    Ok(fresh)
}

/// Data handle for one cached slot.
///
/// # Example
///
/// ```
/// use backoffice_cache::hooks::{CachedData, CachedDataOptions};
/// use backoffice_cache::{CacheConfig, CacheManager, EntityType};
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
/// let users = CachedData::new(cache, EntityType::Users, || async {
///     Ok::<_, backoffice_cache::Error>(vec!["ana".to_string()])
/// }, CachedDataOptions::default());
///
/// users.mount().await;
/// assert_eq!(users.data(), Some(vec!["ana".to_string()]));
/// # });
/// ```
pub struct CachedData<T, F, S: KeyValueStore = MemoryKeyValueStore, O: ObjectStore = InMemoryObjectStore>
{
    cache: Arc<CacheManager<S, O>>,
    entity_type: String,
    fetch: F,
    options: CachedDataOptions<T>,
    timeout: Option<Duration>,
    state: watch::Sender<LoadState<T>>,
    mounted: AtomicBool,
    busy: AtomicBool,
    refreshing: AtomicBool,
}

impl<T, F, S, O> CachedData<T, F, S, O>
where
    T: Clone + Serialize + DeserializeOwned,
    S: KeyValueStore,
    O: ObjectStore,
{
    pub fn new(
        cache: Arc<CacheManager<S, O>>,
        entity_type: impl AsRef<str>,
        fetch: F,
        options: CachedDataOptions<T>,
    ) -> Self {
        let timeout = options.timeout.or(cache.config().fetch_timeout);
        let (state, _) = watch::channel(LoadState::Idle);

        CachedData {
            cache,
            entity_type: entity_type.as_ref().to_string(),
            fetch,
            options,
            timeout,
            state,
            mounted: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn key(&self) -> &str {
        &self.options.key
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState<T>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LoadState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.state.borrow().data().cloned()
    }

    pub fn error(&self) -> Option<Error> {
        self.state.borrow().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Start publishing and run the initial load.
    ///
    /// Returns whether a load ran.
    pub async fn mount<Fut>(&self) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.mounted.store(true, Ordering::Release);
        self.load(false).await
    }

    /// Stop publishing. In-flight loads finish but their state is discarded.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    /// Load again after an input of the fetch changed.
    pub async fn reload<Fut>(&self) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.load(false).await
    }

    /// Run one load. `skip_cache` bypasses the cache read.
    ///
    /// Returns `false` without doing anything when the handle is disabled or
    /// another load is in flight.
    pub async fn load<Fut>(&self, skip_cache: bool) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let skip = skip_cache || self.options.force_refresh;
        self.run(CacheStrategy::for_skip(skip), false).await
    }

    /// Fetch fresh data, bypassing the cache read, and write it through.
    pub async fn refetch<Fut>(&self) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(CacheStrategy::Bypass, true).await
    }

    /// Delete this slot from the cache, then refetch.
    ///
    /// The slot is deleted even when the handle is disabled or busy; only
    /// the refetch is subject to those guards. Returns whether the refetch ran.
    pub async fn invalidate<Fut>(&self) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.cache.invalidate(&self.entity_type, &self.options.key).await {
            warn!(
                "Failed to invalidate {}_{}: {}",
                self.entity_type, self.options.key, e
            );
        }
        self.run(CacheStrategy::Bypass, true).await
    }

    async fn run<Fut>(&self, strategy: CacheStrategy, refresh: bool) -> bool
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.options.enabled {
            return false;
        }
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!(
                "Load of {}_{} skipped, another is in flight",
                self.entity_type, self.options.key
            );
            return false;
        };

        if refresh {
            self.refreshing.store(true, Ordering::Release);
        }
        let previous = self.data();
        self.publish(LoadState::Loading { previous });

        let outcome = resolve(
            &self.cache,
            &self.entity_type,
            &self.options.key,
            strategy,
            self.timeout,
            || (self.fetch)(),
        )
        .await;

        match outcome {
            Ok(data) => {
                if self.is_mounted() {
                    if let Some(callback) = &self.options.on_success {
                        callback(&data);
                    }
                }
                self.publish(LoadState::Success(data));
            }
            Err(e) => {
                error!("Error loading {}: {}", self.entity_type, e);
                if self.is_mounted() {
                    if let Some(callback) = &self.options.on_error {
                        callback(&e);
                    }
                }
                self.publish(LoadState::Failed(e));
            }
        }

        if refresh {
            self.refreshing.store(false, Ordering::Release);
        }
        true
    }

    fn publish(&self, state: LoadState<T>) {
        if self.is_mounted() {
            self.state.send_replace(state);
        } else {
            debug!(
                "Dropping state update for unmounted {}_{}",
                self.entity_type, self.options.key
            );
        }
    }
}

// ============================================================================
// Multiple sources
// ============================================================================

/// Boxed fetch function of a [`CacheSource`].
pub type SourceFetch = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// One `(entity_type, key, fetch)` triple of a [`MultiCachedData`].
#[derive(Clone)]
pub struct CacheSource {
    pub entity_type: String,
    pub key: String,
    pub fetch: SourceFetch,
}

impl CacheSource {
    pub fn new<F, Fut>(entity_type: impl AsRef<str>, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        CacheSource {
            entity_type: entity_type.as_ref().to_string(),
            key: DEFAULT_KEY.to_string(),
            fetch: Arc::new(move || fetch().boxed()),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl fmt::Debug for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSource")
            .field("entity_type", &self.entity_type)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Published state of a [`MultiCachedData`], keyed by entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct MultiState {
    pub data: BTreeMap<String, Value>,
    pub errors: BTreeMap<String, Error>,
    /// True until the first load has settled, and again while any later
    /// load is in flight.
    pub loading: bool,
}

impl Default for MultiState {
    fn default() -> Self {
        MultiState {
            data: BTreeMap::new(),
            errors: BTreeMap::new(),
            loading: true,
        }
    }
}

/// Data handle fanning out over several cached sources concurrently.
///
/// Results are keyed by entity type, so two sources of the same type
/// overwrite each other.
pub struct MultiCachedData<S: KeyValueStore = MemoryKeyValueStore, O: ObjectStore = InMemoryObjectStore> {
    cache: Arc<CacheManager<S, O>>,
    sources: Vec<CacheSource>,
    enabled: bool,
    state: watch::Sender<MultiState>,
    mounted: AtomicBool,
}

impl<S: KeyValueStore, O: ObjectStore> MultiCachedData<S, O> {
    pub fn new(cache: Arc<CacheManager<S, O>>, sources: Vec<CacheSource>) -> Self {
        let (state, _) = watch::channel(MultiState::default());
        MultiCachedData {
            cache,
            sources,
            enabled: true,
            state,
            mounted: AtomicBool::new(false),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn sources(&self) -> &[CacheSource] {
        &self.sources
    }

    pub fn subscribe(&self) -> watch::Receiver<MultiState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> MultiState {
        self.state.borrow().clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub async fn mount(&self) {
        self.mounted.store(true, Ordering::Release);
        self.load(false).await;
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    /// Load every source concurrently and publish once all have settled.
    pub async fn load(&self, skip_cache: bool) {
        if !self.enabled {
            return;
        }

        if self.is_mounted() {
            self.state.send_modify(|s| s.loading = true);
        }

        let strategy = CacheStrategy::for_skip(skip_cache);
        let timeout = self.cache.config().fetch_timeout;

        let outcomes = join_all(self.sources.iter().map(|source| {
            resolve(
                &self.cache,
                &source.entity_type,
                &source.key,
                strategy,
                timeout,
                || (source.fetch)(),
            )
        }))
        .await;

        let mut next = MultiState {
            data: BTreeMap::new(),
            errors: BTreeMap::new(),
            loading: false,
        };
        for (source, outcome) in self.sources.iter().zip(outcomes) {
            match outcome {
                Ok(value) => {
                    next.data.insert(source.entity_type.clone(), value);
                }
                Err(e) => {
                    error!("Error loading {}: {}", source.entity_type, e);
                    next.errors.insert(source.entity_type.clone(), e);
                }
            }
        }

        if self.is_mounted() {
            self.state.send_replace(next);
        } else {
            debug!("Dropping multi-source state update after unmount");
        }
    }

    pub async fn refetch_all(&self) {
        self.load(true).await;
    }

    /// Delete every source's slot, then refetch all.
    pub async fn invalidate_all(&self) {
        let outcomes = join_all(
            self.sources
                .iter()
                .map(|s| self.cache.invalidate(&s.entity_type, &s.key)),
        )
        .await;

        for (source, outcome) in self.sources.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!("Failed to invalidate {}_{}: {}", source.entity_type, source.key, e);
            }
        }

        self.refetch_all().await;
    }
}
