//! Error types for cache operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the cache layer.
///
/// A cache miss is never an error: `get` returns `Ok(None)` and `has` returns
/// `Ok(false)`. Every variant here is a real failure the caller may choose to
/// recover from by recomputing the value.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key was empty.
    #[error("cache key must not be empty")]
    InvalidKey,

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote store could not be reached or the connection broke mid-call.
    #[error("connection error: {0}")]
    Connection(String),

    /// No pooled connection became available within the wait deadline.
    #[error("connection pool exhausted: {max_size} connections busy after waiting {waited:?}")]
    PoolExhausted { max_size: usize, waited: Duration },

    /// A deadline elapsed before the named operation completed.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The remote store answered with an error reply.
    #[error("remote store error: {0}")]
    Remote(String),

    /// The embedded store failed (disk I/O, corruption, worker failure).
    #[error("storage error: {0}")]
    Storage(String),

    /// A maintenance compaction pass failed.
    #[error("compaction failed: {0}")]
    Compaction(String),

    /// Invalid or unsupported configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether retrying the same call later may succeed.
    ///
    /// The cache never retries internally; this only helps callers decide on
    /// their own backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::PoolExhausted { .. } | Self::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            Self::Timeout("redis command")
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Self::Connection(e.to_string())
        } else {
            Self::Remote(e.to_string())
        }
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for CacheError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(e.into_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Storage(format!("blocking task failed: {e}"))
    }
}
