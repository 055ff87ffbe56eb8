//! Integration tests for the embedded `RocksDB` backend
//!
//! Each test opens its own store in a temporary directory.

#![cfg(feature = "rocksdb")]

mod common;

use common::test_data::{Product, User, json_data_sized};
use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use webcache::{
    CacheBackend, CacheConfig, CacheSystemBuilder, CompactionOutcome, Compactor, MaintenanceConfig,
    RocksDbCache,
};

/// Test round trip of a typed value
#[tokio::test]
async fn test_set_and_get() {
    let dir = temp_store_dir();
    let system = setup_embedded_system(&dir).await;
    let cache = system.cache();
    let key = test_key("roundtrip");
    let product = Product::new(7);

    cache.set(&key, &product, None).await.unwrap();

    assert!(cache.has(&key).await.unwrap());
    assert_eq!(cache.get::<Product>(&key).await.unwrap(), Some(product));
    assert_eq!(system.cache().backend_name(), "RocksDB");

    system.shutdown().await.unwrap();
}

/// Test that delete makes a key a miss, and deleting again is fine
#[tokio::test]
async fn test_delete() {
    let dir = temp_store_dir();
    let system = setup_embedded_system(&dir).await;
    let cache = system.cache();

    cache.set("doomed", &User::named("Ana"), None).await.unwrap();
    cache.delete("doomed").await.unwrap();

    assert_eq!(cache.get::<User>("doomed").await.unwrap(), None);
    assert!(!cache.has("doomed").await.unwrap());
    cache.delete("doomed").await.unwrap();
    cache.delete("never-existed").await.unwrap();

    system.shutdown().await.unwrap();
}

/// Test TTL expiry
#[tokio::test]
async fn test_ttl_expiry() {
    let dir = temp_store_dir();
    let system = setup_embedded_system(&dir).await;
    let cache = system.cache();

    cache
        .set("short-lived", &"value", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    cache.set("forever", &"value", None).await.unwrap();
    assert!(cache.has("short-lived").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(cache.get::<String>("short-lived").await.unwrap(), None);
    assert!(!cache.has("short-lived").await.unwrap());
    assert!(cache.has("forever").await.unwrap());

    system.shutdown().await.unwrap();
}

/// Test that empty clears every key
#[tokio::test]
async fn test_empty_removes_everything() {
    let dir = temp_store_dir();
    let system = setup_embedded_system(&dir).await;
    let cache = system.cache();

    let keys: Vec<String> = (0..50).map(|i| format!("bulk:{i}")).collect();
    for (i, key) in keys.iter().enumerate() {
        cache.set(key, &i, None).await.unwrap();
    }

    cache.empty().await.unwrap();

    for key in &keys {
        assert!(!cache.has(key).await.unwrap(), "{key} survived empty");
    }

    system.shutdown().await.unwrap();
}

/// Test that data survives closing and reopening the store
#[tokio::test]
async fn test_persists_across_restart() {
    let dir = temp_store_dir();

    let system = setup_embedded_system(&dir).await;
    system
        .cache()
        .set("user:42", &User::named("Ana"), None)
        .await
        .unwrap();
    system.shutdown().await.unwrap();

    let reopened = setup_embedded_system(&dir).await;
    let user: Option<User> = reopened.cache().get("user:42").await.unwrap();
    assert_eq!(user, Some(User::named("Ana")));

    reopened.shutdown().await.unwrap();
}

/// Test that racing writers leave one of the written values, never a mix
#[tokio::test]
async fn test_concurrent_sets_last_writer_wins() {
    let dir = temp_store_dir();
    let system = setup_embedded_system(&dir).await;
    let v1 = json_data_sized(64);
    let v2 = serde_json::json!({"other": true});

    for _ in 0..20 {
        let a = system.cache().clone();
        let b = system.cache().clone();
        let (va, vb) = (v1.clone(), v2.clone());

        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.set("contested", &va, None).await }),
            tokio::spawn(async move { b.set("contested", &vb, None).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let got: serde_json::Value = system.cache().get("contested").await.unwrap().unwrap();
        assert!(got == v1 || got == v2, "unexpected value {got}");
    }

    system.shutdown().await.unwrap();
}

/// Test compaction running alongside 1000 interleaved operations
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_compaction_concurrent_with_traffic() {
    let dir = temp_store_dir();
    let backend = Arc::new(RocksDbCache::with_path(dir.path()).unwrap());
    let compactor = backend.compactor().expect("RocksDB advertises compaction");

    // Seed stale data so compaction has real work
    for i in 0..500 {
        let key = format!("stale:{i}");
        backend.set(&key, &[0_u8; 256], None).await.unwrap();
        backend.delete(&key).await.unwrap();
    }

    let compacting = tokio::task::spawn_blocking(move || {
        let mut passes = 0;
        for _ in 0..5 {
            compactor.compact(0.0).expect("compaction failed");
            passes += 1;
        }
        passes
    });

    let threshold = Duration::from_secs(2);
    let mut workers = Vec::new();
    for worker in 0..4 {
        let backend = Arc::clone(&backend);
        workers.push(tokio::spawn(async move {
            let mut slowest = Duration::ZERO;
            for i in 0..125 {
                let key = format!("live:{worker}:{i}");
                let value = format!("value-{worker}-{i}").into_bytes();

                let started = Instant::now();
                backend.set(&key, &value, None).await.unwrap();
                let got = backend.get(&key).await.unwrap();
                slowest = slowest.max(started.elapsed());

                assert_eq!(got, Some(value));
            }
            slowest
        }));
    }

    for worker in workers {
        let slowest = worker.await.unwrap();
        assert!(slowest < threshold, "an operation took {slowest:?}");
    }
    assert_eq!(compacting.await.unwrap(), 5);

    for worker in 0..4 {
        for i in 0..125 {
            let key = format!("live:{worker}:{i}");
            let expected = format!("value-{worker}-{i}").into_bytes();
            assert_eq!(backend.get(&key).await.unwrap(), Some(expected), "lost {key}");
        }
    }
}

/// Test that expired records are physically removed by compaction
#[tokio::test]
async fn test_compaction_reclaims_expired_entries() {
    let dir = temp_store_dir();
    let backend = RocksDbCache::with_path(dir.path()).unwrap();

    for i in 0..200 {
        backend
            .set(&format!("ttl:{i}"), &[1_u8; 512], Some(Duration::from_millis(50)))
            .await
            .unwrap();
    }
    backend.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let compactor = backend.compactor().unwrap();
    let outcome = tokio::task::spawn_blocking(move || compactor.compact(0.0))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, CompactionOutcome::Compacted { .. }));

    for i in 0..200 {
        assert!(!backend.has(&format!("ttl:{i}")).await.unwrap());
    }
}

/// Test that the system schedules maintenance for the embedded backend
#[tokio::test]
async fn test_system_schedules_compaction() {
    let dir = temp_store_dir();
    let system = CacheSystemBuilder::new()
        .with_config(CacheConfig::rocksdb(dir.path()))
        .with_maintenance(MaintenanceConfig {
            compaction_interval: Duration::from_millis(100),
            discard_ratio: 0.0,
        })
        .build()
        .await
        .unwrap();

    system.cache().set("k", &1_u32, None).await.unwrap();

    let handle = system.maintenance().expect("RocksDB should be maintained");
    handle.run_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;

    let stats = handle.stats();
    assert!(stats.runs >= 2, "expected manual and scheduled runs, got {stats:?}");
    assert_eq!(stats.failures, 0);
    assert!(system.health_check().await);

    system.shutdown().await.unwrap();
}
