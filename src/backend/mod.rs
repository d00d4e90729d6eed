//! Storage adapters.
//!
//! Two raw store traits are the injection points:
//!
//! - [`KeyValueStore`]: synchronous string store with a capacity limit
//!   (browser local storage in production, [`MemoryKeyValueStore`] elsewhere).
//! - [`ObjectStore`]: asynchronous store of named collections of byte records
//!   (IndexedDB in production, [`InMemoryObjectStore`] elsewhere).
//!
//! On top of them, [`BoundedBackend`] and [`VersionedBackend`] implement the
//! cache semantics: entry format, lazy expiry, version checks, quota eviction
//! and memoized initialization.

use crate::error::Result;

pub mod bounded;
pub mod memory;
pub mod object_store;
pub mod versioned;

pub use bounded::{BoundedBackend, BoundedItem, WriteOutcome};
pub use memory::MemoryKeyValueStore;
pub use object_store::InMemoryObjectStore;
pub use versioned::VersionedBackend;

/// Synchronous string key/value store.
///
/// All methods use `&self`; implementations rely on interior mutability.
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value, replacing any previous one.
    ///
    /// # Errors
    /// Returns `Error::QuotaExceeded` when the write does not fit, or another
    /// error if the store is unavailable.
    fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Every key currently in the store, including ones this crate did not write.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Asynchronous store of named collections holding byte records.
///
/// **ASYNC:** All methods are async and must be awaited.
#[allow(async_fn_in_trait)]
pub trait ObjectStore: Send + Sync {
    /// Connect and make sure every listed collection exists.
    ///
    /// Must be idempotent: existing collections and their records survive.
    ///
    /// # Errors
    /// Returns `Err` if the store cannot be opened.
    async fn open(&self, collections: &[String]) -> Result<()>;

    /// # Errors
    /// Returns `Err` on store failure or if the collection does not exist.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a record.
    ///
    /// # Errors
    /// Returns `Err` on store failure or if the collection does not exist.
    async fn put(&self, collection: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// # Errors
    /// Returns `Err` on store failure or if the collection does not exist.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// Remove every record of a collection.
    ///
    /// # Errors
    /// Returns `Err` on store failure or if the collection does not exist.
    async fn clear(&self, collection: &str) -> Result<()>;

    /// Number of records in a collection, expired ones included.
    ///
    /// # Errors
    /// Returns `Err` on store failure or if the collection does not exist.
    async fn count(&self, collection: &str) -> Result<usize>;
}
