//! Cache statistics: derived on demand, never stored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-entity figures for the bounded store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedStats {
    pub count: usize,
    /// Serialized bytes.
    pub size: usize,
}

/// Per-entity figures for the object store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreStats {
    pub count: usize,
}

/// Aggregate over both backends.
///
/// Serializes as
/// `{"localStorage": {type: {count, size}}, "indexedDB": {type: {count}}, "totalSize": n}`
/// for the admin UI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    #[serde(rename = "localStorage")]
    pub bounded: BTreeMap<String, BoundedStats>,
    #[serde(rename = "indexedDB")]
    pub object_store: BTreeMap<String, ObjectStoreStats>,
    /// Bounded-store bytes; object-store records are not sized.
    #[serde(rename = "totalSize")]
    pub total_size: usize,
}

impl CacheStats {
    pub(crate) fn add_bounded(&mut self, entity_type: &str, size: usize) {
        let slot = self.bounded.entry(entity_type.to_string()).or_default();
        slot.count += 1;
        slot.size += size;
        self.total_size += size;
    }

    pub(crate) fn set_object_count(&mut self, entity_type: &str, count: usize) {
        self.object_store
            .insert(entity_type.to_string(), ObjectStoreStats { count });
    }

    /// Entries across both backends.
    pub fn total_items(&self) -> usize {
        self.bounded.values().map(|s| s.count).sum::<usize>()
            + self.object_store.values().map(|s| s.count).sum::<usize>()
    }

    /// Human-readable breakdown, one line per entity type plus a total.
    pub fn size_breakdown(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.bounded.len() + self.object_store.len() + 1);

        for (entity_type, s) in &self.bounded {
            lines.push(format!(
                "{}: {} items, {:.2} KB",
                entity_type,
                s.count,
                s.size as f64 / 1024.0
            ));
        }
        for (entity_type, s) in &self.object_store {
            lines.push(format!("{}: {} items (object store)", entity_type, s.count));
        }
        lines.push(format!("Total: {:.2} KB", self.total_size as f64 / 1024.0));

        lines
    }
}

/// Format a byte count with a binary unit, e.g. `1536` → `"1.5 KB"`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, UNITS[exponent])
}
