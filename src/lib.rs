//! Webcache
//!
//! A backend-agnostic key-value cache for web services featuring:
//! - **Typed Handle**: One `Cache` API over interchangeable storage backends
//! - **Redis Backend**: Shared remote cache behind a bounded, health-checked connection pool
//! - **`RocksDB` Backend**: Embedded log-structured store with per-key TTL
//! - **Scheduled Compaction**: Background reclamation of expired and overwritten data
//! - **Pluggable Codecs**: JSON by default, `MessagePack` behind the `msgpack` feature
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use webcache::{CacheConfig, CacheSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Backend chosen from configuration (CACHE=rocksdb here)
//!     let system = CacheSystem::from_config(&CacheConfig::rocksdb("./tmp/cache")).await?;
//!     let cache = system.cache().clone();
//!
//!     let data = serde_json::json!({"user": "alice", "score": 100});
//!     cache.set("user:1", &data, Some(Duration::from_secs(300))).await?;
//!
//!     if let Some(cached) = cache.get::<serde_json::Value>("user:1").await? {
//!         tracing::info!("Cached data: {}", cached);
//!     }
//!
//!     system.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Cache::<Codec> ──encode──▶ dyn CacheBackend ──┬─▶ RedisCache ──▶ Pool ──▶ Redis
//!                                               └─▶ RocksDbCache ──▶ blocking pool ──▶ RocksDB
//!                                                        ▲
//!                               MaintenanceScheduler ────┘ (compaction)
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod cache;
pub mod codecs;
pub mod config;
pub mod error;
#[cfg(feature = "redis")]
pub mod pool;
pub mod scheduler;
pub mod traits;

#[cfg(feature = "redis")]
pub use backends::{RedisCache, RedisConnectionManager};

#[cfg(feature = "rocksdb")]
pub use backends::RocksDbCache;

pub use builder::CacheSystemBuilder;
pub use cache::{Cache, CacheStats};
pub use codecs::{AnyCodec, JsonCodec};
#[cfg(feature = "msgpack")]
pub use codecs::MsgPackCodec;
pub use config::{
    BackendKind, CacheConfig, CodecKind, MaintenanceConfig, PoolConfig, RedisConfig,
    RocksDbConfig,
};
pub use error::CacheError;
#[cfg(feature = "redis")]
pub use pool::{PoolState, PoolStats};
pub use scheduler::{MaintenanceHandle, MaintenanceScheduler, MaintenanceStats};
pub use traits::{CacheBackend, CacheCodec, CompactionOutcome, Compactor};

// Re-export async_trait for user convenience
pub use async_trait::async_trait;

/// Main entry point for the cache
///
/// Owns the configured backend, the typed [`Cache`] handle and, for backends
/// that need it, the running compaction job. Construct one at startup, hand
/// out clones of [`cache()`](Self::cache) and call
/// [`shutdown`](Self::shutdown) on exit.
///
/// # Example
///
/// ```rust,no_run
/// use webcache::CacheSystem;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     // CACHE=redis REDIS_HOST=... REDIS_PREFIX=app:
///     let system = CacheSystem::from_env().await?;
///     let cache = system.cache().clone();
///
///     system.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct CacheSystem {
    cache: Cache,
    maintenance: Option<MaintenanceHandle>,
}

impl CacheSystem {
    /// Create cache system from process environment variables
    ///
    /// See [`CacheConfig::from_lookup`] for the recognized variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or invalid, or if the
    /// embedded store cannot be opened.
    pub async fn from_env() -> Result<Self> {
        let config = CacheConfig::from_env().context("Failed to load cache configuration")?;
        Self::from_config(&config).await
    }

    /// Create cache system from explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the selected
    /// backend cannot be constructed. An unreachable Redis server is not an
    /// error here; connections are dialed on first use.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        CacheSystemBuilder::new()
            .with_config(config.clone())
            .build()
            .await
    }

    pub(crate) fn new(cache: Cache, maintenance: Option<MaintenanceHandle>) -> Self {
        Self { cache, maintenance }
    }

    /// Get the typed cache handle (primary interface)
    ///
    /// Clone it freely; all clones share the backend.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Running compaction job, if the backend has one
    #[must_use]
    pub fn maintenance(&self) -> Option<&MaintenanceHandle> {
        self.maintenance.as_ref()
    }

    /// Perform health check on the backend
    pub async fn health_check(&self) -> bool {
        let healthy = self.cache.health_check().await;
        if healthy {
            info!(backend = self.cache.backend_name(), "Cache health check passed");
        } else {
            warn!(backend = self.cache.backend_name(), "Cache health check failed");
        }
        healthy
    }

    /// Stop maintenance and release backend resources
    ///
    /// Outstanding [`Cache`] clones keep the backend object alive but any
    /// operation on them after shutdown fails (closed pool) or runs against a
    /// flushed store.
    ///
    /// A compaction pass already running is not awaited. It keeps its
    /// blocking-pool thread until done, and dropping the tokio runtime waits
    /// for that thread; use `Runtime::shutdown_timeout` or
    /// `Runtime::shutdown_background` to bound process exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to close cleanly.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(handle) = &self.maintenance {
            handle.shutdown();
        }

        let backend: &Arc<dyn CacheBackend> = self.cache.backend();
        backend
            .close()
            .await
            .with_context(|| format!("Failed to close {} backend", backend.name()))?;

        info!(backend = backend.name(), "Cache system shut down");
        Ok(())
    }
}
