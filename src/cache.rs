//! Cache - Typed Cache Handle
//!
//! The only surface application code depends on. Values pass through a
//! [`CacheCodec`] on the way in and out, and storage is delegated to whichever
//! [`CacheBackend`] was chosen at startup.

use crate::codecs::{self, AnyCodec};
use crate::error::{CacheError, Result};
use crate::traits::{CacheBackend, CacheCodec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Typed cache handle
///
/// Cheap to clone; clones share the backend and statistics. Construct one at
/// startup (usually through [`CacheSystem`](crate::CacheSystem)) and pass it
/// to the components that need caching.
///
/// # Semantics
///
/// - `get` returns `Ok(None)` on a miss or an expired entry; `Err` always
///   means a real failure (backend error or undecodable payload)
/// - a `ttl` of `None` or zero stores the value without expiration
/// - `delete` succeeds when the key is absent
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
/// use webcache::{Cache, JsonCodec, RocksDbCache};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// # async fn example() -> webcache::error::Result<()> {
/// let backend = Arc::new(RocksDbCache::with_path("./tmp/cache")?);
/// let cache = Cache::new(backend, JsonCodec);
///
/// cache.set("user:42", &User { name: "Ana".into() }, Some(Duration::from_secs(60))).await?;
/// let user: Option<User> = cache.get("user:42").await?;
/// # Ok(())
/// # }
/// ```
pub struct Cache<C: CacheCodec = AnyCodec> {
    backend: Arc<dyn CacheBackend>,
    codec: C,
    stats: Arc<AtomicCacheStats>,
}

impl<C: CacheCodec + Clone> Clone for Cache<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            codec: self.codec.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<C: CacheCodec> Cache<C> {
    /// Create a handle over a backend with the given codec
    pub fn new(backend: Arc<dyn CacheBackend>, codec: C) -> Self {
        debug!(backend = backend.name(), codec = codec.name(), "Initializing cache handle");
        Self {
            backend,
            codec,
            stats: Arc::new(AtomicCacheStats::default()),
        }
    }

    /// Check whether a non-expired entry exists
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] for an empty key or the backend's
    /// error on failure; never errors because the key is absent.
    pub async fn has(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        self.track(self.backend.has(key).await)
    }

    /// Get and decode a value
    ///
    /// # Returns
    /// * `Ok(Some(value))` - Cache hit
    /// * `Ok(None)` - Key absent or expired
    ///
    /// # Errors
    ///
    /// Returns a backend error, or [`CacheError::Serialization`] if the stored
    /// payload cannot be decoded as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        check_key(key)?;

        let Some(payload) = self.track(self.backend.get(key).await)? else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match codecs::open::<_, T>(&self.codec, &payload) {
            Ok(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, codec = self.codec.name(), error = %e, "Failed to decode cached value");
                Err(e)
            }
        }
    }

    /// Encode and store a value, replacing any existing entry
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if encoding fails, or the
    /// backend's error if the write fails.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        check_key(key)?;
        let payload = codecs::seal(&self.codec, value).inspect_err(|_| {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        })?;
        let ttl = ttl.filter(|d| !d.is_zero());

        self.track(self.backend.set(key, &payload, ttl).await)?;
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove a key
    ///
    /// # Errors
    ///
    /// Returns the backend's error on failure; absence is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.track(self.backend.delete(key).await)?;
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove every entry in this cache's scope
    ///
    /// The scope is backend-specific: the key prefix for Redis, the whole
    /// store for `RocksDB`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error on failure.
    pub async fn empty(&self) -> Result<()> {
        self.track(self.backend.empty().await)
    }

    /// Get a cached value or compute, store and return a fresh one
    ///
    /// The cache is treated as an optimization: a failed read or write is
    /// logged and the computed value is still returned. Only the compute
    /// function's own error is propagated.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let user: User = cache
    ///     .get_or_compute("user:123", Some(Duration::from_secs(300)), || async {
    ///         load_user_from_db(123).await
    ///     })
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns whatever `compute_fn` returns on failure.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute_fn: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, recomputing");
            }
        }

        let value = compute_fn().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(key = %key, error = %e, "Failed to cache computed value");
        }
        Ok(value)
    }

    /// Check if the backend is healthy
    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// Name of the backend serving this cache
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(CacheError::InvalidKey)
    } else {
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// `get` calls
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Failed operations of any kind
    pub errors: u64,
    /// Hits as a percentage of requests
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct AtomicCacheStats {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicCacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self) -> CacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        CacheStats {
            requests,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if requests > 0 {
                (hits as f64 / requests as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}
