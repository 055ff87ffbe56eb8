//! RocksDB Cache - Embedded Log-Structured Backend
//!
//! Local on-disk cache using RocksDB. Writes are appended to the store's log
//! and memtables; overwritten, deleted and expired records keep occupying
//! space until compaction rewrites the affected files.
//!
//! # Record Layout
//!
//! ```text
//! +------------------------------+------------------+
//! | expires_at (unix ms, u64 BE) | payload ...      |
//! +------------------------------+------------------+
//! ```
//!
//! `expires_at == 0` means the record never expires. Expired records are
//! invisible to reads immediately and are physically dropped by a compaction
//! filter the next time RocksDB compacts the file holding them, whether that
//! is a background compaction or a scheduled one.

use crate::config::RocksDbConfig;
use crate::error::{CacheError, Result};
use crate::traits::{CacheBackend, CompactionOutcome, Compactor};
use async_trait::async_trait;
use rocksdb::compaction_filter::Decision;
use rocksdb::{DB, IteratorMode, Options, WriteBatch};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

const RECORD_HEADER_LEN: usize = 8;
const NEVER_EXPIRES: u64 = 0;
const DELETE_BATCH: usize = 1024;

const PROP_TOTAL_SST_SIZE: &str = "rocksdb.total-sst-files-size";
const PROP_LIVE_DATA_SIZE: &str = "rocksdb.estimate-live-data-size";
/// Records inspected when estimating how much live data has expired
const EXPIRY_SAMPLE_LIMIT: usize = 100_000;

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn expires_at(ttl: Option<Duration>, now_ms: u64) -> u64 {
    match ttl {
        None => NEVER_EXPIRES,
        Some(ttl) => {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            now_ms.saturating_add(ttl_ms)
        }
    }
}

fn encode_record(value: &[u8], expires_at: u64) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + value.len());
    record.extend_from_slice(&expires_at.to_be_bytes());
    record.extend_from_slice(value);
    record
}

/// Split a record into its expiry and payload
fn decode_record(record: &[u8]) -> Result<(u64, &[u8])> {
    let (header, payload) = record
        .split_first_chunk::<RECORD_HEADER_LEN>()
        .ok_or_else(|| CacheError::Storage(format!("truncated record ({} bytes)", record.len())))?;
    Ok((u64::from_be_bytes(*header), payload))
}

fn is_expired(expires_at: u64, now_ms: u64) -> bool {
    expires_at != NEVER_EXPIRES && expires_at <= now_ms
}

/// Compaction filter dropping records whose expiry has passed
fn drop_expired(_level: u32, _key: &[u8], value: &[u8]) -> Decision {
    match decode_record(value) {
        Ok((expires_at, _)) if is_expired(expires_at, unix_millis()) => Decision::Remove,
        _ => Decision::Keep,
    }
}

/// Open RocksDB handle shared by the backend and its compactor
struct Store {
    db: DB,
    path: PathBuf,
}

impl Store {
    fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compaction_filter("expired-entries", drop_expired);

        let db = DB::open(&opts, path)
            .map_err(|e| CacheError::Storage(format!("failed to open {}: {e}", path.display())))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    fn get_live(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(record) = self.db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let (expires_at, payload) = decode_record(&record)?;
        if is_expired(expires_at, unix_millis()) {
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let record = encode_record(value, expires_at(ttl, unix_millis()));
        self.db.put(key.as_bytes(), record)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    /// Delete every key, returning how many were removed
    fn clear(&self) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete(key);
            removed += 1;
            if batch.len() >= DELETE_BATCH {
                self.db.write(std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            self.db.write(batch)?;
        }

        Ok(removed)
    }

    /// Share of visible bytes, among the first sampled records, that are expired
    ///
    /// RocksDB counts expired records as live data until the compaction
    /// filter runs, so the SST properties alone never see them.
    #[allow(clippy::cast_precision_loss)]
    fn expired_fraction(&self) -> Result<f64> {
        let now_ms = unix_millis();
        let mut sampled: u64 = 0;
        let mut expired: u64 = 0;

        for item in self.db.iterator(IteratorMode::Start).take(EXPIRY_SAMPLE_LIMIT) {
            let (key, record) = item.map_err(|e| CacheError::Compaction(format!("sampling: {e}")))?;
            let bytes = (key.len() + record.len()) as u64;
            sampled += bytes;
            if matches!(decode_record(&record), Ok((at, _)) if is_expired(at, now_ms)) {
                expired += bytes;
            }
        }

        if sampled == 0 {
            return Ok(0.0);
        }
        Ok(expired as f64 / sampled as f64)
    }

    fn int_property(&self, name: &str) -> Result<u64> {
        self.db
            .property_int_value(name)
            .map_err(|e| CacheError::Compaction(format!("reading {name}: {e}")))
            .map(Option::unwrap_or_default)
    }
}

impl Compactor for Store {
    #[allow(clippy::cast_precision_loss)]
    fn compact(&self, discard_ratio: f64) -> Result<CompactionOutcome> {
        self.db
            .flush()
            .map_err(|e| CacheError::Compaction(format!("flush: {e}")))?;

        let total = self.int_property(PROP_TOTAL_SST_SIZE)?;
        if total == 0 {
            return Ok(CompactionOutcome::Skipped { discard_ratio: 0.0 });
        }
        let live = self.int_property(PROP_LIVE_DATA_SIZE)?.min(total);
        let live_share = live as f64 / total as f64;
        let stale = 1.0 - live_share * (1.0 - self.expired_fraction()?);

        if stale < discard_ratio {
            debug!(
                path = %self.path.display(),
                stale_ratio = stale,
                threshold = discard_ratio,
                "[RocksDB] Not enough stale data to compact"
            );
            return Ok(CompactionOutcome::Skipped {
                discard_ratio: stale,
            });
        }

        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        info!(
            path = %self.path.display(),
            stale_ratio = stale,
            reclaimed_bytes = total.saturating_sub(self.int_property(PROP_TOTAL_SST_SIZE)?),
            "[RocksDB] Compacted store"
        );
        Ok(CompactionOutcome::Compacted {
            discard_ratio: stale,
        })
    }

    fn name(&self) -> &'static str {
        "RocksDB"
    }
}

/// Embedded RocksDB cache backend
///
/// All store calls run on tokio's blocking pool, so request tasks never
/// stall an executor thread on disk I/O. Reads are bounded by the operation
/// deadline. Writes (`set`, `delete`, `empty`, `flush`) always run to
/// completion before returning: a write that could outlive its caller
/// would let a later write to the same key be overtaken by an earlier one.
/// RocksDB owns all locking; this type adds none.
///
/// # `empty` scope
///
/// `empty` deletes every key in the store, not only keys written through
/// this handle: the directory is owned by one cache.
///
/// **Example**:
/// ```rust,no_run
/// use webcache::backends::RocksDbCache;
/// use webcache::traits::CacheBackend;
///
/// # async fn example() -> webcache::error::Result<()> {
/// let cache = RocksDbCache::with_path("./tmp/cache")?;
/// cache.set("greeting", b"hello", None).await?;
/// assert_eq!(cache.get("greeting").await?, Some(b"hello".to_vec()));
/// # Ok(())
/// # }
/// ```
pub struct RocksDbCache {
    store: Arc<Store>,
    operation_timeout: Duration,
}

impl RocksDbCache {
    /// Open (or create) the store at the configured path
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the directory cannot be opened,
    /// for example because another process holds its lock.
    pub fn open(config: &RocksDbConfig, operation_timeout: Duration) -> Result<Self> {
        info!(path = %config.path.display(), "Initializing RocksDB Cache");
        let store = Store::open(&config.path)?;
        info!(path = %config.path.display(), "RocksDB Cache opened successfully");

        Ok(Self {
            store: Arc::new(store),
            operation_timeout,
        })
    }

    /// Open with a 3 second operation deadline
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the directory cannot be opened.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let config = RocksDbConfig { path: path.into() };
        Self::open(&config, Duration::from_secs(3))
    }

    /// Directory backing this cache
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.store.path
    }

    /// Persist memtables to disk
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] on I/O failure.
    pub async fn flush(&self) -> Result<()> {
        self.blocking_write(|store| Ok(store.db.flush()?)).await
    }

    /// Run a read on the blocking pool under the operation deadline
    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(&store));

        match tokio::time::timeout(self.operation_timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(CacheError::Timeout(op)),
        }
    }

    /// Run a write on the blocking pool and wait for it to finish
    async fn blocking_write<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

#[async_trait]
impl CacheBackend for RocksDbCache {
    async fn has(&self, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.blocking("rocksdb has", move |store| Ok(store.get_live(&key)?.is_some()))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_owned();
        self.blocking("rocksdb get", move |store| store.get_live(&key))
            .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let key_owned = key.to_owned();
        let value = value.to_vec();
        self.blocking_write(move |store| store.put(&key_owned, &value, ttl))
            .await?;
        debug!(key = %key, ttl = ?ttl, "[RocksDB] Cached key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_owned();
        self.blocking_write(move |store| store.delete(&key)).await
    }

    async fn empty(&self) -> Result<()> {
        let removed = self.blocking_write(Store::clear).await?;
        info!(path = %self.path().display(), removed, "[RocksDB] Emptied cache");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let test_key = format!("__health_check:{}", uuid::Uuid::new_v4());
        let test_value = b"health_check_value";

        match self
            .set(&test_key, test_value, Some(Duration::from_secs(60)))
            .await
        {
            Ok(()) => match self.get(&test_key).await {
                Ok(Some(retrieved)) => {
                    let _ = self.delete(&test_key).await;
                    retrieved == test_value
                }
                _ => false,
            },
            Err(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        "RocksDB"
    }

    fn compactor(&self) -> Option<Arc<dyn Compactor>> {
        Some(Arc::clone(&self.store) as Arc<dyn Compactor>)
    }

    async fn close(&self) -> Result<()> {
        self.flush().await?;
        info!(path = %self.path().display(), "[RocksDB] Flushed cache on close");
        Ok(())
    }
}
