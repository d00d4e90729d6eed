//! Entity types and their cache policies.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which physical store holds an entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// Small, frequently read values: capacity-bounded string store with eviction.
    Bounded,
    /// Larger or more numerous records: one object-store collection per entity type.
    ObjectStore,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Bounded => write!(f, "bounded"),
            StorageKind::ObjectStore => write!(f, "object-store"),
        }
    }
}

/// Retention policy for one entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityPolicy {
    pub ttl: Duration,
    pub storage: StorageKind,
}

impl EntityPolicy {
    pub const fn new(ttl: Duration, storage: StorageKind) -> Self {
        EntityPolicy { ttl, storage }
    }
}

/// The back-office entity types registered by default.
///
/// The string form is the storage name: it is the object-store collection name
/// and the first segment of bounded-store keys, so it must never contain `_`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Customers,
    Products,
    Invoices,
    Payments,
    Users,
    BusinessSettings,
    LowStockProducts,
    UserActivity,
}

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Customers,
        EntityType::Products,
        EntityType::Invoices,
        EntityType::Payments,
        EntityType::Users,
        EntityType::BusinessSettings,
        EntityType::LowStockProducts,
        EntityType::UserActivity,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customers => "customers",
            EntityType::Products => "products",
            EntityType::Invoices => "invoices",
            EntityType::Payments => "payments",
            EntityType::Users => "users",
            EntityType::BusinessSettings => "businessSettings",
            EntityType::LowStockProducts => "lowStockProducts",
            EntityType::UserActivity => "userActivity",
        }
    }

    /// Default policy, tuned to how often each entity changes.
    pub const fn default_policy(&self) -> EntityPolicy {
        const MINUTE: u64 = 60;
        match self {
            EntityType::Customers => {
                EntityPolicy::new(Duration::from_secs(10 * MINUTE), StorageKind::ObjectStore)
            }
            EntityType::Products => {
                EntityPolicy::new(Duration::from_secs(15 * MINUTE), StorageKind::ObjectStore)
            }
            EntityType::Invoices => {
                EntityPolicy::new(Duration::from_secs(5 * MINUTE), StorageKind::ObjectStore)
            }
            EntityType::Payments => {
                EntityPolicy::new(Duration::from_secs(5 * MINUTE), StorageKind::ObjectStore)
            }
            EntityType::Users => {
                EntityPolicy::new(Duration::from_secs(30 * MINUTE), StorageKind::Bounded)
            }
            EntityType::BusinessSettings => {
                EntityPolicy::new(Duration::from_secs(60 * MINUTE), StorageKind::Bounded)
            }
            EntityType::LowStockProducts => {
                EntityPolicy::new(Duration::from_secs(10 * MINUTE), StorageKind::Bounded)
            }
            EntityType::UserActivity => {
                EntityPolicy::new(Duration::from_secs(2 * MINUTE), StorageKind::Bounded)
            }
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for EntityType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::ConfigError(format!("Unknown entity type: {}", s)))
    }
}
