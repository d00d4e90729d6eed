//! Metrics hooks for cache operations.
//!
//! The manager reports every operation to a [`CacheMetrics`] implementation.
//! The default is [`NoOpMetrics`]; [`CountingMetrics`] keeps in-process
//! counters and is what the debug surface reads.
//!
//! ```
//! use backoffice_cache::observability::{CacheMetrics, CountingMetrics};
//! use std::time::Duration;
//!
//! let metrics = CountingMetrics::default();
//! metrics.record_hit("customers_default", Duration::from_micros(40));
//! assert_eq!(metrics.snapshot().hits, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trait for cache metrics collection.
///
/// `key` is the composite `{entity_type}_{key}` form.
pub trait CacheMetrics: Send + Sync {
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// `stored` is false when the write was dropped (quota exhausted or unconfigured type).
    fn record_set(&self, key: &str, stored: bool, duration: Duration) {
        debug!("Cache SET: {} (stored: {}) took {:?}", key, stored, duration);
    }

    fn record_invalidate(&self, key: &str) {
        debug!("Cache INVALIDATE: {}", key);
    }

    fn record_eviction(&self, count: usize) {
        debug!("Cache EVICT: {} entries", count);
    }

    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _stored: bool, _duration: Duration) {}
    fn record_invalidate(&self, _key: &str) {}
    fn record_eviction(&self, _count: usize) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Atomic operation counters.
#[derive(Default)]
pub struct CountingMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    rejected_sets: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`CountingMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub rejected_sets: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub errors: u64,
}

impl MetricsSnapshot {
    /// Hits over reads, `0.0` before the first read.
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            0.0
        } else {
            self.hits as f64 / reads as f64
        }
    }
}

impl CountingMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            rejected_sets: self.rejected_sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for CountingMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str, _duration: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_set(&self, _key: &str, stored: bool, _duration: Duration) {
        if stored {
            self.sets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_invalidate(&self, _key: &str) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!("Cache ERROR for {}: {}", key, error);
    }
}
