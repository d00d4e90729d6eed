//! Cache configuration: the entity policy table and store tuning.

use crate::entity::{EntityPolicy, EntityType, StorageKind};
use crate::error::{Error, Result};
use crate::serialization::CURRENT_SCHEMA_VERSION;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Key prefix for every entry this crate writes to the bounded store.
pub const DEFAULT_NAMESPACE: &str = "bo_cache_";

/// Share of namespaced bounded-store entries dropped when a write hits the quota.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

pub const ENV_NAMESPACE: &str = "BO_CACHE_NAMESPACE";
pub const ENV_EVICTION_FRACTION: &str = "BO_CACHE_EVICTION_FRACTION";
pub const ENV_TTL_JITTER: &str = "BO_CACHE_TTL_JITTER";
pub const ENV_FETCH_TIMEOUT_MS: &str = "BO_CACHE_FETCH_TIMEOUT_MS";

/// Process-wide cache configuration.
///
/// Built once and handed to [`CacheManager::new`](crate::CacheManager::new),
/// which keeps it behind an `Arc`; nothing mutates it afterwards.
///
/// # Example
///
/// ```
/// use backoffice_cache::config::CacheConfig;
/// use backoffice_cache::entity::{EntityPolicy, StorageKind};
/// use std::time::Duration;
///
/// let config = CacheConfig::default()
///     .with_eviction_fraction(0.5)
///     .with_entity("tables", EntityPolicy::new(Duration::from_secs(60), StorageKind::Bounded));
///
/// assert!(config.validate().is_ok());
/// assert!(config.policy("tables").is_some());
/// ```
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Bounded-store key prefix.
    pub namespace: String,

    /// Version tag written into every entry; entries carrying another tag are misses.
    pub schema_version: u32,

    /// Fraction of namespaced bounded entries evicted on quota pressure, in `(0, 1]`.
    pub eviction_fraction: f64,

    /// Maximum share of the TTL shaved off per key, in `[0, 1)`.
    ///
    /// The reduction is derived from a hash of the full cache key, so it is
    /// stable for a key but differs between keys that share an entity type.
    pub ttl_jitter: f64,

    /// Default fetch timeout for data handles. `None` waits forever.
    pub fetch_timeout: Option<Duration>,

    entities: BTreeMap<String, EntityPolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let entities = EntityType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), t.default_policy()))
            .collect();

        CacheConfig {
            namespace: DEFAULT_NAMESPACE.to_string(),
            schema_version: CURRENT_SCHEMA_VERSION,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
            ttl_jitter: 0.0,
            fetch_timeout: None,
            entities,
        }
    }
}

impl CacheConfig {
    /// Configuration with no registered entity types.
    pub fn empty() -> Self {
        CacheConfig {
            entities: BTreeMap::new(),
            ..Self::default()
        }
    }

    /// Register (or replace) an entity type.
    pub fn with_entity(mut self, entity_type: impl Into<String>, policy: EntityPolicy) -> Self {
        self.entities.insert(entity_type.into(), policy);
        self
    }

    pub fn without_entity(mut self, entity_type: &str) -> Self {
        self.entities.remove(entity_type);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = fraction;
        self
    }

    pub fn with_ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = jitter;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Policy for an entity type, if registered.
    pub fn policy(&self, entity_type: &str) -> Option<&EntityPolicy> {
        self.entities.get(entity_type)
    }

    /// All registered entity types in name order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &EntityPolicy)> {
        self.entities.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    /// Entity types stored in the given backend.
    pub fn entities_in(&self, storage: StorageKind) -> Vec<String> {
        self.entities
            .iter()
            .filter(|(_, p)| p.storage == storage)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// TTL for one slot after jitter.
    pub fn effective_ttl(&self, full_key: &str, ttl: Duration) -> Duration {
        if self.ttl_jitter <= 0.0 {
            return ttl;
        }

        let mut hasher = DefaultHasher::new();
        full_key.hash(&mut hasher);
        let unit = (hasher.finish() % 10_000) as f64 / 10_000.0;

        ttl.mul_f64(1.0 - self.ttl_jitter * unit)
    }

    /// Check the configuration for values the backends cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for an empty namespace, an entity name that is
    /// empty or contains `_`, an eviction fraction outside `(0, 1]`, or a jitter
    /// outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::ConfigError("namespace must not be empty".to_string()));
        }

        for name in self.entities.keys() {
            if name.is_empty() || name.contains('_') {
                return Err(Error::ConfigError(format!(
                    "invalid entity type name: {:?}",
                    name
                )));
            }
        }

        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(Error::ConfigError(format!(
                "eviction fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }

        if !(0.0..1.0).contains(&self.ttl_jitter) {
            return Err(Error::ConfigError(format!(
                "ttl jitter must be in [0, 1), got {}",
                self.ttl_jitter
            )));
        }

        Ok(())
    }

    /// Default configuration with overrides from the environment.
    ///
    /// Reads `BO_CACHE_NAMESPACE`, `BO_CACHE_EVICTION_FRACTION`,
    /// `BO_CACHE_TTL_JITTER` and `BO_CACHE_FETCH_TIMEOUT_MS`. The entity table
    /// itself is not overridable.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if a variable does not parse or the result
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup(ENV_NAMESPACE) {
            config.namespace = ns;
        }
        if let Some(raw) = lookup(ENV_EVICTION_FRACTION) {
            config.eviction_fraction = parse_var(ENV_EVICTION_FRACTION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TTL_JITTER) {
            config.ttl_jitter = parse_var(ENV_TTL_JITTER, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FETCH_TIMEOUT_MS) {
            let ms: u64 = parse_var(ENV_FETCH_TIMEOUT_MS, &raw)?;
            config.fetch_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        info!(
            "Cache config loaded: namespace={}, eviction_fraction={}, ttl_jitter={}",
            config.namespace, config.eviction_fraction, config.ttl_jitter
        );
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("{} has an invalid value: {:?}", name, raw)))
}
