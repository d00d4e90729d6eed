//! Read strategies for cached fetches.
//!
//! A read either trusts the cache, skips it, or clears it first. The three
//! modes map onto how data handles load:
//!
//! | Strategy | Cache hit | Cache miss | Used by |
//! |----------|-----------|------------|---------|
//! | **Refresh** | Return | Fetch, store | mount / reload |
//! | **Bypass** | Ignore, fetch, store | Fetch, store | `refetch`, `force_refresh` |
//! | **Invalidate** | Delete, fetch, store | Fetch, store | `invalidate` |
//!
//! ```
//! use backoffice_cache::strategy::CacheStrategy;
//!
//! assert_eq!(CacheStrategy::default(), CacheStrategy::Refresh);
//! assert!(CacheStrategy::Refresh.reads_cache());
//! assert!(!CacheStrategy::Bypass.reads_cache());
//! ```

use std::fmt;

/// How a read-through fetch treats the cached slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Cache first, fetch on miss and store the result.
    #[default]
    Refresh,

    /// Skip the cache read but write the fresh result through.
    Bypass,

    /// Delete the slot, then fetch and write through.
    Invalidate,
}

impl CacheStrategy {
    /// Whether the cached slot is consulted before fetching.
    pub fn reads_cache(&self) -> bool {
        matches!(self, CacheStrategy::Refresh)
    }

    /// Strategy for a load that may or may not skip the cache.
    pub fn for_skip(skip_cache: bool) -> Self {
        if skip_cache {
            CacheStrategy::Bypass
        } else {
            CacheStrategy::Refresh
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Refresh => write!(f, "Refresh"),
            CacheStrategy::Bypass => write!(f, "Bypass"),
            CacheStrategy::Invalidate => write!(f, "Invalidate"),
        }
    }
}
