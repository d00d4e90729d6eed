//! Cache key addressing and key derivation for wrapped fetches.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Key used when a call has no distinguishing arguments.
pub const DEFAULT_KEY: &str = "default";

/// Identity of one cache slot: `(entity_type, key)`.
///
/// Two `CacheKey`s with the same entity type and key always address the same slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub entity_type: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        CacheKey {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    /// Slot holding the argument-less value of an entity type.
    pub fn default_for(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, DEFAULT_KEY)
    }

    /// Composite form: `{entity_type}_{key}`.
    pub fn full(&self) -> String {
        format!("{}_{}", self.entity_type, self.key)
    }

    /// Bounded-store key: `{namespace}{entity_type}_{key}`.
    pub fn storage_key(&self, namespace: &str) -> String {
        format!("{}{}", namespace, self.full())
    }

    /// Prefix shared by every bounded-store key of an entity type.
    pub fn type_prefix(namespace: &str, entity_type: &str) -> String {
        format!("{}{}_", namespace, entity_type)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key == DEFAULT_KEY {
            write!(f, "{}", self.entity_type)
        } else {
            write!(f, "{} ({})", self.entity_type, self.key)
        }
    }
}

/// Derives the slot key of a wrapped call from its arguments.
///
/// Implemented by [`JsonArgsKey`] and by any `Fn(&A) -> String` closure.
pub trait KeyFn<A>: Send + Sync {
    /// # Errors
    ///
    /// Returns `Err` if the arguments cannot be turned into a key. Wrappers
    /// then skip the cache for that call.
    fn derive(&self, args: &A) -> Result<String>;
}

impl<A, F> KeyFn<A> for F
where
    F: Fn(&A) -> String + Send + Sync,
{
    fn derive(&self, args: &A) -> Result<String> {
        Ok(self(args))
    }
}

/// Default key derivation: the JSON encoding of the argument tuple.
///
/// `()` maps to [`DEFAULT_KEY`], `(1, 2)` to `[1,2]` and `("a",)` to `["a"]`.
/// Arguments have to be `Serialize`, so callbacks and other opaque values are
/// rejected at compile time; use a custom [`KeyFn`] for those.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonArgsKey;

impl<A: Serialize> KeyFn<A> for JsonArgsKey {
    fn derive(&self, args: &A) -> Result<String> {
        let value = serde_json::to_value(args)
            .map_err(|e| Error::SerializationError(format!("cache key: {}", e)))?;

        match value {
            serde_json::Value::Null => Ok(DEFAULT_KEY.to_string()),
            serde_json::Value::Array(ref items) if items.is_empty() => {
                Ok(DEFAULT_KEY.to_string())
            }
            other => serde_json::to_string(&other)
                .map_err(|e| Error::SerializationError(format!("cache key: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_forms() {
        let key = CacheKey::new("customers", "[10]");
        assert_eq!(key.full(), "customers_[10]");
        assert_eq!(key.storage_key("bo_cache_"), "bo_cache_customers_[10]");
        assert_eq!(CacheKey::type_prefix("bo_cache_", "users"), "bo_cache_users_");
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(CacheKey::default_for("users").to_string(), "users");
        assert_eq!(CacheKey::new("users", "u1").to_string(), "users (u1)");
    }

    #[test]
    fn test_json_args_key_no_args_is_default() {
        assert_eq!(JsonArgsKey.derive(&()).unwrap(), DEFAULT_KEY);
    }

    #[test]
    fn test_json_args_key_tuple() {
        assert_eq!(JsonArgsKey.derive(&(1, 2)).unwrap(), "[1,2]");
        assert_eq!(JsonArgsKey.derive(&("north",)).unwrap(), "[\"north\"]");
        assert_ne!(
            JsonArgsKey.derive(&(1, 2)).unwrap(),
            JsonArgsKey.derive(&(1, 3)).unwrap()
        );
    }

    #[test]
    fn test_closure_key_fn() {
        let by_id = |args: &(String, u32)| format!("user:{}", args.0);
        assert_eq!(
            by_id.derive(&("u7".to_string(), 3)).unwrap(),
            "user:u7".to_string()
        );
    }
}
