//! Storage formats for cache entries.
//!
//! The two backends keep entries in different shapes:
//!
//! - **Bounded store** (string values): a JSON [`CacheEntry`]
//!   `{"data": .., "expiry": .., "version": .., "timestamp": ..}`. Its byte
//!   length is what the stats report and what counts against the store quota.
//! - **Object store** (byte values): a postcard [`CacheEnvelope`] around a
//!   [`RecordBody`]. The payload travels as JSON text inside the record,
//!   because postcard cannot decode self-describing values.
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (u32)   │ RecordBody {key, data, expiry, ts}   │
//! └─────────────────┴─────────────────┴──────────────────────────────────────┘
//!   "BOCR"
//! ```
//!
//! Both decoders validate the schema version; a mismatch means the entry was
//! written by an older build and must be treated as absent.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Magic header for object-store records: b"BOCR"
pub const RECORD_MAGIC: [u8; 4] = *b"BOCR";

/// Current schema version.
///
/// Increment when the shape of cached payloads changes so that old entries
/// are dropped on the next read instead of being handed to new code.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Bounded-store entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    /// Absolute expiry in Unix milliseconds.
    pub expiry: u64,
    pub version: u32,
    /// Creation time in Unix milliseconds; eviction order.
    pub timestamp: u64,
}

impl CacheEntry {
    pub fn new(data: Value, now_ms: u64, ttl_ms: u64, version: u32) -> Self {
        CacheEntry {
            data,
            expiry: now_ms.saturating_add(ttl_ms),
            version,
            timestamp: now_ms,
        }
    }

    /// An entry is expired from its expiry instant onwards.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expiry
    }
}

/// Encode a bounded-store entry as JSON text.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the payload cannot be encoded.
pub fn encode_entry(entry: &CacheEntry) -> Result<String> {
    serde_json::to_string(entry).map_err(|e| {
        error!("Cache entry serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a bounded-store entry and check its version.
///
/// # Errors
///
/// - `Error::DeserializationError`: not a valid entry
/// - `Error::VersionMismatch`: written with another schema version
pub fn decode_entry(raw: &str, expected_version: u32) -> Result<CacheEntry> {
    let entry: CacheEntry = serde_json::from_str(raw)
        .map_err(|e| Error::DeserializationError(e.to_string()))?;

    if entry.version != expected_version {
        return Err(Error::VersionMismatch {
            expected: expected_version,
            found: entry.version,
        });
    }

    Ok(entry)
}

/// Versioned envelope for object-store records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T, version: u32) -> Self {
        Self {
            magic: RECORD_MAGIC,
            version,
            payload,
        }
    }
}

/// Object-store record body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordBody {
    pub key: String,
    /// Payload as JSON text.
    pub data: String,
    pub expiry: u64,
    pub timestamp: u64,
}

/// Decoded object-store record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub data: Value,
    pub expiry: u64,
    pub version: u32,
    pub timestamp: u64,
}

impl StoredRecord {
    pub fn new(key: impl Into<String>, data: Value, now_ms: u64, ttl_ms: u64, version: u32) -> Self {
        StoredRecord {
            key: key.into(),
            data,
            expiry: now_ms.saturating_add(ttl_ms),
            version,
            timestamp: now_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expiry
    }
}

/// Encode an object-store record.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the payload or the envelope cannot be encoded.
pub fn encode_record(record: &StoredRecord) -> Result<Vec<u8>> {
    let data = serde_json::to_string(&record.data)
        .map_err(|e| Error::SerializationError(e.to_string()))?;

    let envelope = CacheEnvelope::new(
        RecordBody {
            key: record.key.clone(),
            data,
            expiry: record.expiry,
            timestamp: record.timestamp,
        },
        record.version,
    );

    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache record serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode an object-store record with validation.
///
/// # Errors
///
/// - `Error::DeserializationError`: corrupted envelope or payload
/// - `Error::InvalidCacheEntry`: bad magic header
/// - `Error::VersionMismatch`: written with another schema version
pub fn decode_record(bytes: &[u8], expected_version: u32) -> Result<StoredRecord> {
    let envelope: CacheEnvelope<RecordBody> = postcard::from_bytes(bytes)?;

    if envelope.magic != RECORD_MAGIC {
        warn!(
            "Invalid cache record: expected magic {:?}, got {:?}",
            RECORD_MAGIC, envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            RECORD_MAGIC, envelope.magic
        )));
    }

    if envelope.version != expected_version {
        return Err(Error::VersionMismatch {
            expected: expected_version,
            found: envelope.version,
        });
    }

    let body = envelope.payload;
    let data = serde_json::from_str(&body.data)
        .map_err(|e| Error::DeserializationError(e.to_string()))?;

    Ok(StoredRecord {
        key: body.key,
        data,
        expiry: body.expiry,
        version: envelope.version,
        timestamp: body.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_expiry_boundary() {
        let entry = CacheEntry::new(json!([1, 2]), 10_000, 5_000, 1);
        assert_eq!(entry.expiry, 15_000);
        assert!(!entry.is_expired(14_999));
        assert!(entry.is_expired(15_000));
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = CacheEntry::new(json!({"name": "Masala"}), 1, 2, 1);
        let raw = encode_entry(&entry).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed["data"]["name"], "Masala");
        assert_eq!(parsed["expiry"], 3);
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["timestamp"], 1);
    }

    #[test]
    fn test_decode_entry_rejects_garbage() {
        assert!(matches!(
            decode_entry("{broken", 1),
            Err(Error::DeserializationError(_))
        ));
    }

    #[test]
    fn test_decode_entry_version_mismatch() {
        let raw = encode_entry(&CacheEntry::new(json!(null), 0, 10, 0)).unwrap();
        assert_eq!(
            decode_entry(&raw, 1).unwrap_err(),
            Error::VersionMismatch {
                expected: 1,
                found: 0
            }
        );
    }

    #[test]
    fn test_record_envelope_structure() {
        let record = StoredRecord::new("default", json!([{"id": 1}]), 100, 50, 1);
        let bytes = encode_record(&record).unwrap();

        let envelope: CacheEnvelope<RecordBody> = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.magic, RECORD_MAGIC);
        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.payload.expiry, 150);

        assert_eq!(decode_record(&bytes, 1).unwrap(), record);
    }

    #[test]
    fn test_record_bad_magic_rejected() {
        let mut envelope = CacheEnvelope::new(
            RecordBody {
                key: "default".to_string(),
                data: "[]".to_string(),
                expiry: 1,
                timestamp: 0,
            },
            1,
        );
        envelope.magic = *b"XXXX";
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        assert!(matches!(
            decode_record(&bytes, 1),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_record_version_mismatch_rejected() {
        let record = StoredRecord::new("default", json!([]), 0, 10, 999);
        let bytes = encode_record(&record).unwrap();

        match decode_record(&bytes, CURRENT_SCHEMA_VERSION) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_record_rejected() {
        let record = StoredRecord::new("default", json!({"x": "y".repeat(64)}), 0, 10, 1);
        let mut bytes = encode_record(&record).unwrap();
        bytes.truncate(bytes.len() / 2);

        assert!(matches!(
            decode_record(&bytes, 1),
            Err(Error::DeserializationError(_))
        ));
    }
}
