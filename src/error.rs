//! Error types for the cache layer.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache layer.
///
/// A cache miss is never an error: reads return `Ok(None)`. Corrupt or
/// outdated entries are also reported as misses by the backends, so the
/// variants below only reach callers when something actually failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Serialization failed when converting a payload or record to storage form.
    SerializationError(String),

    /// Deserialization failed when reading a payload or record from storage.
    ///
    /// Backends translate this into a miss and evict the entry; it only
    /// surfaces from the typed helpers and the serialization functions.
    DeserializationError(String),

    /// Storage backend error (store unavailable, missing collection, failed open).
    ///
    /// **Recovery:** the wrappers fall back to a fresh fetch; data handles
    /// surface it through their error state.
    BackendError(String),

    /// The bounded store refused a write because its capacity is exhausted.
    ///
    /// Recovered inside `BoundedBackend::set` by evicting the oldest entries
    /// and retrying once.
    QuotaExceeded(String),

    /// The wrapped remote fetch or mutation failed.
    FetchError(String),

    /// A fetch exceeded the configured timeout.
    Timeout(String),

    /// Invalid cache configuration.
    ConfigError(String),

    /// Stored record has a bad magic header or a corrupted envelope.
    InvalidCacheEntry(String),

    /// Stored record was written with a different schema version.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from the stored record)
        found: u32,
    },

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::QuotaExceeded(msg) => write!(f, "Quota exceeded: {}", msg),
            Error::FetchError(msg) => write!(f, "Fetch error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::InvalidCacheEntry(msg) => {
                write!(f, "Invalid cache entry: {}", msg)
            }
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for errors the bounded backend recovers from by evicting entries.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Error::QuotaExceeded(_))
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() || e.is_data() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::DeserializationError(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::QuotaExceeded("bo_cache_users_default".to_string());
        assert_eq!(err.to_string(), "Quota exceeded: bo_cache_users_default");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_from_json_syntax() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = Error::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert_eq!(err.to_string(), "Cache version mismatch: expected 1, found 7");
        assert!(!err.is_quota_exceeded());
    }
}
