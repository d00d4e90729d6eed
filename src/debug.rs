//! Operator console for inspecting the cache at runtime.

use crate::backend::{InMemoryObjectStore, KeyValueStore, MemoryKeyValueStore, ObjectStore};
use crate::error::Result;
use crate::key::DEFAULT_KEY;
use crate::manager::CacheManager;
use crate::stats::{format_bytes, CacheStats};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HELP: &str = "\
Cache debug commands:

  get_all()                       - cache statistics
  clear_all()                     - clear every cache
  get(type, key)                  - cached data of one slot
  invalidate(type, key)           - drop one slot
  is_valid(type, key)             - whether a slot holds live data
  enable_monitoring()             - log every cache operation
  disable_monitoring()            - stop logging cache operations
  test_performance(type, fetch)   - compare an uncached fetch with a cache read
  size_breakdown()                - per-type counts and sizes
  help()                          - this text

Examples:
  get(\"customers\", \"default\")
  invalidate(\"products\", \"default\")";

/// Await `future` and report how long it took.
pub async fn measure<F: Future>(name: &str, future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    let elapsed = start.elapsed();
    debug!("⏱ {} took {:?}", name, elapsed);
    (output, elapsed)
}

/// Result of [`CacheDebug::test_performance`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceReport {
    pub uncached: Duration,
    pub cached: Duration,
    /// Share of the uncached time saved by the cache read, in percent.
    pub improvement_pct: f64,
}

impl PerformanceReport {
    fn new(uncached: Duration, cached: Duration) -> Self {
        let improvement_pct = if uncached.is_zero() {
            0.0
        } else {
            (uncached.as_secs_f64() - cached.as_secs_f64()) / uncached.as_secs_f64() * 100.0
        };

        PerformanceReport {
            uncached,
            cached,
            improvement_pct,
        }
    }
}

/// Debug console over a shared [`CacheManager`].
///
/// Every command logs its outcome at `info` and returns it.
pub struct CacheDebug<S: KeyValueStore = MemoryKeyValueStore, O: ObjectStore = InMemoryObjectStore> {
    cache: Arc<CacheManager<S, O>>,
}

impl<S: KeyValueStore, O: ObjectStore> CacheDebug<S, O> {
    pub fn new(cache: Arc<CacheManager<S, O>>) -> Self {
        info!("🔧 Cache debugging enabled. Call help() for commands.");
        CacheDebug { cache }
    }

    /// # Errors
    /// Returns `Err` if either backing store fails.
    pub async fn get_all(&self) -> Result<CacheStats> {
        let stats = self.cache.stats().await?;
        info!(
            "📊 Cache statistics: {} items, {}",
            stats.total_items(),
            format_bytes(stats.total_size)
        );
        Ok(stats)
    }

    /// # Errors
    /// Returns `Err` if either backing store fails.
    pub async fn clear_all(&self) -> Result<()> {
        self.cache.clear_all().await?;
        info!("🗑 All caches cleared");
        Ok(())
    }

    /// # Errors
    /// Returns `Err` if the backing store fails.
    pub async fn get(&self, entity_type: &str, key: Option<&str>) -> Result<Option<Value>> {
        let key = key.unwrap_or(DEFAULT_KEY);
        let data = self.cache.get(entity_type, key).await?;
        info!(
            "📦 Cache [{}/{}]: {}",
            entity_type,
            key,
            if data.is_some() { "present" } else { "empty" }
        );
        Ok(data)
    }

    /// # Errors
    /// Returns `Err` if the backing store fails.
    pub async fn invalidate(&self, entity_type: &str, key: Option<&str>) -> Result<()> {
        let key = key.unwrap_or(DEFAULT_KEY);
        self.cache.invalidate(entity_type, key).await?;
        info!("❌ Cache [{}/{}] invalidated", entity_type, key);
        Ok(())
    }

    /// # Errors
    /// Returns `Err` if the backing store fails.
    pub async fn is_valid(&self, entity_type: &str, key: Option<&str>) -> Result<bool> {
        let key = key.unwrap_or(DEFAULT_KEY);
        let valid = self.cache.is_valid(entity_type, key).await?;
        info!("✅ Cache [{}/{}] valid: {}", entity_type, key, valid);
        Ok(valid)
    }

    pub fn enable_monitoring(&self) {
        self.cache.set_monitoring(true);
    }

    pub fn disable_monitoring(&self) {
        self.cache.set_monitoring(false);
    }

    /// Time an uncached `fetch` of `entity_type` against a cache read of the
    /// same slot.
    ///
    /// The type is invalidated first; the fetched value is stored under the
    /// default key so the second read can hit.
    ///
    /// # Errors
    /// Returns `Err` if `fetch` fails or a backing store fails.
    pub async fn test_performance<F, Fut>(
        &self,
        entity_type: &str,
        fetch: F,
    ) -> Result<PerformanceReport>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        info!("⏱ Testing cache performance for {}", entity_type);

        self.cache.invalidate_type(entity_type).await?;

        let (fresh, uncached) = measure("uncached fetch", fetch()).await;
        self.cache.set(entity_type, fresh?, DEFAULT_KEY).await?;

        let (cached_read, cached) =
            measure("cached read", self.cache.get(entity_type, DEFAULT_KEY)).await;
        cached_read?;

        let report = PerformanceReport::new(uncached, cached);
        info!(
            "🚀 {}: uncached {:?}, cached {:?}, improvement {:.1}%",
            entity_type, report.uncached, report.cached, report.improvement_pct
        );
        Ok(report)
    }

    /// Log and return the per-type breakdown lines.
    ///
    /// # Errors
    /// Returns `Err` if either backing store fails.
    pub async fn size_breakdown(&self) -> Result<Vec<String>> {
        let lines = self.cache.stats().await?.size_breakdown();
        info!("📦 Cache size breakdown:");
        for line in &lines {
            info!("  {}", line);
        }
        Ok(lines)
    }

    pub fn help(&self) -> &'static str {
        info!("{}", HELP);
        HELP
    }
}
