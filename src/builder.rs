//! Cache System Builder
//!
//! Provides a builder for constructing [`CacheSystem`] from configuration or
//! from a custom backend.
//!
//! # Example: Configured Backend
//!
//! ```rust,no_run
//! use webcache::{CacheConfig, CacheSystemBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = CacheSystemBuilder::new()
//!         .with_config(CacheConfig::redis("redis://127.0.0.1:6379"))
//!         .build()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Backend
//!
//! ```rust,ignore
//! use webcache::CacheSystemBuilder;
//! use std::sync::Arc;
//!
//! let system = CacheSystemBuilder::new()
//!     .with_backend(Arc::new(MyBackend::new()))
//!     .build()
//!     .await?;
//! ```

use crate::codecs::AnyCodec;
use crate::config::{BackendKind, CacheConfig, MaintenanceConfig};
use crate::scheduler::MaintenanceScheduler;
use crate::traits::CacheBackend;
use crate::{Cache, CacheSystem};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for constructing [`CacheSystem`]
///
/// # Default Behavior
///
/// - **Configuration**: read from the environment unless given explicitly
/// - **Backend**: constructed from configuration unless given explicitly
/// - **Codec**: the configured codec (JSON by default)
/// - **Maintenance**: scheduled whenever the backend supports compaction
pub struct CacheSystemBuilder {
    config: Option<CacheConfig>,
    backend: Option<Arc<dyn CacheBackend>>,
    codec: Option<AnyCodec>,
    maintenance: Option<MaintenanceConfig>,
    maintenance_enabled: bool,
}

impl CacheSystemBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            codec: None,
            maintenance: None,
            maintenance_enabled: true,
        }
    }

    /// Use explicit configuration instead of environment variables
    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an already constructed backend
    ///
    /// Configuration is then only consulted for the codec and maintenance
    /// settings, and is not read from the environment if absent.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override the configured codec
    #[must_use]
    pub fn with_codec(mut self, codec: AnyCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Override the configured compaction schedule
    #[must_use]
    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    /// Never schedule compaction, even for backends that support it
    #[must_use]
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance_enabled = false;
        self
    }

    /// Build the [`CacheSystem`]
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is missing or invalid, the codec
    /// needs a disabled feature, or the backend cannot be constructed.
    pub async fn build(self) -> Result<CacheSystem> {
        let config = match self.config {
            Some(config) => {
                config.validate().context("Invalid cache configuration")?;
                Some(config)
            }
            None if self.backend.is_none() => {
                Some(CacheConfig::from_env().context("Failed to load cache configuration")?)
            }
            None => None,
        };

        let backend = match self.backend {
            Some(backend) => {
                info!(backend = backend.name(), "Using custom cache backend");
                backend
            }
            None => match &config {
                Some(config) => create_backend(config).await?,
                None => anyhow::bail!("No cache backend or configuration provided"),
            },
        };

        let codec = match self.codec {
            Some(codec) => codec,
            None => AnyCodec::from_kind(config.as_ref().map(|c| c.codec).unwrap_or_default())
                .context("Failed to select cache codec")?,
        };

        let maintenance = if self.maintenance_enabled {
            let schedule = self
                .maintenance
                .or_else(|| config.as_ref().map(|c| c.maintenance))
                .unwrap_or_default();
            MaintenanceScheduler::register(backend.as_ref(), schedule)
        } else {
            None
        };

        let cache = Cache::new(backend, codec);

        if !cache.health_check().await {
            warn!(
                backend = cache.backend_name(),
                "Cache backend failed its startup health check, continuing"
            );
        }

        info!(
            backend = cache.backend_name(),
            maintenance = maintenance.is_some(),
            "Cache system initialized successfully"
        );

        Ok(CacheSystem::new(cache, maintenance))
    }
}

impl Default for CacheSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn create_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>> {
    match config.backend {
        #[cfg(feature = "redis")]
        BackendKind::Redis => {
            let cache = crate::backends::RedisCache::new(&config.redis, config.operation_timeout)
                .context("Failed to create Redis cache")?;
            Ok(Arc::new(cache))
        }
        #[cfg(feature = "rocksdb")]
        BackendKind::RocksDb => {
            let rocksdb = config.rocksdb.clone();
            let timeout = config.operation_timeout;
            let cache = tokio::task::spawn_blocking(move || {
                crate::backends::RocksDbCache::open(&rocksdb, timeout)
            })
            .await
            .context("RocksDB open task failed")?
            .with_context(|| format!("Failed to open RocksDB at {}", config.rocksdb.path.display()))?;
            Ok(Arc::new(cache))
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("{other:?} backend support is not compiled in"),
    }
}
