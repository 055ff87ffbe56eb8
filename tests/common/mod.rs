//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Redis connection helpers
//! - Temporary `RocksDB` directories
//! - Test data generators

#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;
use webcache::{CacheConfig, CacheSystem, CacheSystemBuilder};

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Generate a unique key prefix so parallel Redis tests never share a namespace
pub fn test_prefix(name: &str) -> String {
    format!("test:{}:{}:", name, rand::random::<u32>())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Fresh directory for an embedded store, removed when dropped
pub fn temp_store_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("webcache-test-")
        .tempdir()
        .expect("Failed to create temp dir")
}

/// Embedded cache system rooted in `dir`, without scheduled compaction
pub async fn setup_embedded_system(dir: &TempDir) -> CacheSystem {
    CacheSystemBuilder::new()
        .with_config(CacheConfig::rocksdb(dir.path()))
        .without_maintenance()
        .build()
        .await
        .expect("Failed to build embedded cache system")
}

/// Redis cache system with a unique prefix and a short checkout wait
pub async fn setup_redis_system(prefix: &str, max_size: usize) -> CacheSystem {
    let mut config = CacheConfig::redis(redis_url());
    config.redis.prefix = prefix.to_string();
    config.redis.pool.max_size = max_size;
    config.redis.pool.max_idle = max_size;
    config.redis.pool.wait_timeout = Duration::from_millis(200);

    CacheSystem::from_config(&config)
        .await
        .expect("Failed to build Redis cache system")
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub name: String,
    }

    impl User {
        pub fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Product {
        pub id: u64,
        pub name: String,
        pub price: f64,
        pub category: String,
    }

    impl Product {
        #[allow(clippy::cast_precision_loss)]
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("Product {id}"),
                price: 99.99 + (id as f64),
                category: format!("Category {}", id % 5),
            }
        }
    }

    /// Generate JSON test data with specified size
    pub fn json_data_sized(size_kb: usize) -> serde_json::Value {
        serde_json::json!({
            "data": "x".repeat(size_kb * 1024),
            "size_kb": size_kb
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = test_key("user");
        let key2 = test_key("user");
        assert_ne!(key1, key2, "Keys should be unique");
        assert!(key1.starts_with("test_user_"));
    }
}
