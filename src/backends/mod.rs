//! Cache Backend Implementations
//!
//! This module contains the storage backends behind the [`Cache`](crate::Cache) contract.
//!
//! # Available Backends
//!
//! ## Remote
//! - **Redis** - Shared cache over a bounded, health-checked connection pool (feature: `redis`)
//!
//! ## Embedded
//! - **`RocksDB`** - Local log-structured store with scheduled compaction (feature: `rocksdb`)
//!
//! # Usage
//!
//! ```rust,no_run
//! use webcache::backends::{RedisCache, RocksDbCache};
//!
//! # fn example() -> webcache::error::Result<()> {
//! // Explicit backend selection
//! let redis = RedisCache::with_url("redis://127.0.0.1:6379", "app:")?;
//! let rocks = RocksDbCache::with_path("./tmp/cache")?;
//! # Ok(())
//! # }
//! ```
//!
//! Most applications never name a backend; [`CacheSystem`](crate::CacheSystem)
//! picks one from configuration.

#[cfg(feature = "redis")]
pub mod redis_cache;

#[cfg(feature = "rocksdb")]
pub mod rocksdb_cache;

#[cfg(feature = "redis")]
pub use redis_cache::{RedisCache, RedisConnectionManager};

#[cfg(feature = "rocksdb")]
pub use rocksdb_cache::RocksDbCache;
