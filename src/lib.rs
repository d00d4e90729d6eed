//! # backoffice-cache
//!
//! Multi-tier client cache for restaurant back-office data.
//!
//! ## Features
//!
//! - **Per-entity policies:** every entity type has its own TTL and storage tier
//! - **Two backends:** a capacity-bounded string store with quota eviction, and a
//!   versioned object store opened once on first use
//! - **Read-through wrappers:** [`fetch::with_cache`] and [`fetch::with_cache_invalidation`]
//!   cache remote reads and drop affected entity types after writes
//! - **Data handles:** [`hooks::CachedData`] and [`hooks::MultiCachedData`] load on mount,
//!   guard against overlapping loads and late results after unmount
//! - **Introspection:** [`CacheStats`], [`debug::CacheDebug`] and pluggable [`observability::CacheMetrics`]
//!
//! ## Quick Start
//!
//! ```
//! use backoffice_cache::repository::InMemoryDataSource;
//! use backoffice_cache::{CacheConfig, CacheManager, CacheService, EntityType};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let source = InMemoryDataSource::new();
//! source.insert_all(EntityType::Customers, vec![json!({"id": "c1", "name": "Asha"})]);
//!
//! let cache = Arc::new(CacheManager::in_memory(CacheConfig::default()));
//! let service = CacheService::new(source, cache);
//!
//! // First read goes to the source, the second is served from the cache.
//! service.customers().await.unwrap();
//! service.customers().await.unwrap();
//! assert_eq!(service.source().fetch_count(EntityType::Customers), 1);
//!
//! // Writes drop the cached list.
//! service.save_customer(json!({"name": "Dev"})).await.unwrap();
//! assert_eq!(service.customers().await.unwrap().len(), 2);
//! # });
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod clock;
pub mod config;
pub mod debug;
pub mod entity;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod key;
pub mod manager;
pub mod observability;
pub mod repository;
pub mod serialization;
pub mod service;
pub mod stats;
pub mod strategy;

// Re-exports for convenience
pub use backend::{KeyValueStore, ObjectStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entity::{EntityPolicy, EntityType, StorageKind};
pub use error::{Error, Result};
pub use fetch::{with_cache, with_cache_invalidation};
pub use hooks::{CachedData, CachedDataOptions, LoadState, MultiCachedData};
pub use key::CacheKey;
pub use manager::CacheManager;
pub use repository::DataSource;
pub use service::CacheService;
pub use stats::CacheStats;
pub use strategy::CacheStrategy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
