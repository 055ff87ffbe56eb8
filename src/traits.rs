//! Cache Backend Traits
//!
//! This module defines the trait abstractions that allow the cache layer to
//! run over interchangeable storage backends and serialization codecs.
//!
//! # Architecture
//!
//! - `CacheCodec`: Trait for pluggable serialization backends
//! - `CacheBackend`: Byte-level contract implemented by every storage backend
//! - `Compactor`: Optional maintenance capability of log-structured backends
//!
//! Application code never talks to a `CacheBackend` directly. It holds a typed
//! [`Cache`](crate::Cache) handle, which runs values through a codec and then
//! delegates to whichever backend was selected at startup.
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use webcache::{CacheBackend, async_trait};
//! use webcache::error::Result;
//! use std::time::Duration;
//!
//! struct MyStore {
//!     // Your implementation
//! }
//!
//! #[async_trait]
//! impl CacheBackend for MyStore {
//!     async fn has(&self, key: &str) -> Result<bool> { todo!() }
//!     async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> { todo!() }
//!     async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> { todo!() }
//!     async fn delete(&self, key: &str) -> Result<()> { todo!() }
//!     async fn empty(&self) -> Result<()> { todo!() }
//!     async fn health_check(&self) -> bool { todo!() }
//! }
//! ```

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Trait for cache value serialization/deserialization
///
/// Implementations turn an application value into bytes and back. The
/// [`Cache`](crate::Cache) handle wraps the codec output in a small versioned
/// header carrying [`format_id`](CacheCodec::format_id), so payloads written by
/// one codec are rejected by another instead of being misread.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` to support concurrent access
/// across async tasks and provide debugging capabilities.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use webcache::CacheCodec;
/// use webcache::error::{CacheError, Result};
/// use serde::{Serialize, de::DeserializeOwned};
///
/// #[derive(Debug)]
/// struct MyCustomCodec;
///
/// impl CacheCodec for MyCustomCodec {
///     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
///         mycodec::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))
///     }
///
///     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
///         mycodec::deserialize(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "mycodec"
///     }
///
///     fn format_id(&self) -> u8 {
///         200
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`](crate::CacheError::Serialization)
    /// if the value cannot be represented in this format.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`](crate::CacheError::Serialization)
    /// if the bytes do not match the shape of `T`.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Get the name of the codec
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str;

    /// Identifier written into every payload header.
    ///
    /// Must be unique per wire format.
    fn format_id(&self) -> u8;
}

/// Core cache backend contract
///
/// This trait defines the operations every storage backend supports,
/// operating on opaque bytes under logical (unprefixed) keys. Both built-in
/// backends implement it identically from the caller's point of view.
///
/// # Semantics
///
/// - A miss is `Ok(false)` / `Ok(None)`, never an error
/// - `ttl` of `None` means the entry never expires
/// - `delete` succeeds when the key is absent
/// - the scope of `empty` is backend-specific (see each backend)
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to support concurrent access across
/// async tasks. Backends own their internal synchronization.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Check whether a non-expired entry exists
    ///
    /// # Errors
    ///
    /// Returns an error only on backend failure, never because the key is absent.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Get the stored bytes for a key
    ///
    /// # Returns
    ///
    /// * `Ok(Some(bytes))` - Entry found
    /// * `Ok(None)` - Key not found or expired
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure (connection lost, disk error).
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes under a key, replacing any existing entry
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The value to store (as bytes)
    /// * `ttl` - Time-to-live, `None` for no expiration
    ///
    /// When this returns, the write has either been applied or definitely
    /// failed: a backend must not leave a write running after reporting a
    /// timeout, or a later `set` of the same key could be overtaken by it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects or fails the write.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Remove a key
    ///
    /// # Errors
    ///
    /// Returns an error only on backend failure.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry reachable by this backend
    ///
    /// # Errors
    ///
    /// Returns an error on backend failure or when the backend refuses to
    /// wipe an unbounded namespace.
    async fn empty(&self) -> Result<()>;

    /// Check if cache backend is healthy
    ///
    /// For remote stores this is a liveness probe; for embedded stores a
    /// write/read/delete round trip.
    async fn health_check(&self) -> bool;

    /// Get the name of this cache backend
    ///
    /// This is used for logging and debugging purposes.
    fn name(&self) -> &'static str {
        "unknown"
    }

    /// Maintenance capability
    ///
    /// Log-structured backends return a handle the
    /// [`MaintenanceScheduler`](crate::MaintenanceScheduler) can run
    /// periodically. Everything else keeps the default `None`.
    fn compactor(&self) -> Option<Arc<dyn Compactor>> {
        None
    }

    /// Release backend resources (pooled connections, file handles)
    ///
    /// # Errors
    ///
    /// Returns an error if resources could not be released cleanly.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Result of a single compaction pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompactionOutcome {
    /// Stale space reached the threshold and was rewritten
    Compacted {
        /// Estimated stale fraction before compacting
        discard_ratio: f64,
    },
    /// Not enough stale space to be worth a rewrite
    Skipped {
        /// Estimated stale fraction observed
        discard_ratio: f64,
    },
}

/// Space-reclamation capability of append-only backends
///
/// `compact` is synchronous and may run for a long time; callers run it on a
/// blocking thread. It must be safe to call concurrently with reads and
/// writes, and calling it repeatedly must be harmless.
pub trait Compactor: Send + Sync {
    /// Reclaim stale space if at least `discard_ratio` of the store is stale
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Compaction`](crate::CacheError::Compaction) if the
    /// pass failed. The store stays usable either way.
    fn compact(&self, discard_ratio: f64) -> Result<CompactionOutcome>;

    /// Name used in maintenance logs
    fn name(&self) -> &'static str {
        "unknown"
    }
}
