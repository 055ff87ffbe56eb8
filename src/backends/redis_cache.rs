//! Redis Cache - Remote Pooled Backend
//!
//! Redis-based cache reached through a bounded, health-checked connection
//! pool. Keys are namespaced with a configurable prefix and expiry is
//! delegated to Redis (`SET ... PX`).

use crate::config::RedisConfig;
use crate::error::{CacheError, Result};
use crate::pool::{Pool, PoolState, PoolStats};
use crate::traits::CacheBackend;
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, Client, FromRedisValue, IntoConnectionInfo};
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per `SCAN` round trip during [`RedisCache::empty`]
const SCAN_BATCH: usize = 500;

/// Dials Redis connections for the pool and probes them with `PING`
///
/// Dialing is bounded by the connect timeout and every reply on a dialed
/// connection by the response timeout, so a server that accepts the socket
/// but never answers still fails in bounded time.
pub struct RedisConnectionManager {
    client: Client,
    connection_config: AsyncConnectionConfig,
}

impl RedisConnectionManager {
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the URL is not a valid Redis URL.
    pub fn new(
        redis_url: impl IntoConnectionInfo,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {e}")))?;
        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(Some(connect_timeout))
            .set_response_timeout(Some(response_timeout));
        Ok(Self {
            client,
            connection_config,
        })
    }
}

impl Manager for RedisConnectionManager {
    type Type = MultiplexedConnection;
    type Error = CacheError;

    async fn create(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection_with_config(&self.connection_config)
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CacheError::Timeout("connection dial")
                } else {
                    e.into()
                }
            })
    }

    async fn recycle(
        &self,
        conn: &mut MultiplexedConnection,
        _: &Metrics,
    ) -> RecycleResult<CacheError> {
        let pong: String = redis::cmd("PING")
            .query_async(conn)
            .await
            .map_err(|e| RecycleError::Backend(e.into()))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(RecycleError::Backend(CacheError::Connection(format!(
                "unexpected PING reply: {pong}"
            ))))
        }
    }
}

/// Redis cache backend over a connection pool
///
/// Every operation checks out one connection, runs one command under the
/// operation deadline and returns the connection, also on error. A
/// connection whose command failed at the transport level or timed out is
/// closed instead of returned.
///
/// # `empty` scope
///
/// `empty` removes only keys under this cache's prefix (`SCAN MATCH prefix*`
/// plus batched `DEL`). With an empty prefix it refuses with
/// [`CacheError::Config`] instead of wiping the whole Redis database.
pub struct RedisCache {
    pool: Pool<RedisConnectionManager>,
    prefix: String,
    operation_timeout: Duration,
}

impl RedisCache {
    /// Create a Redis cache from configuration
    ///
    /// No connection is dialed here; the pool fills on first use. Use
    /// [`health_check`](CacheBackend::health_check) to probe reachability.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the connection URL is invalid.
    pub fn new(config: &RedisConfig, operation_timeout: Duration) -> Result<Self> {
        let redis_url = config.connection_url();
        let manager = RedisConnectionManager::new(
            redis_url.as_str(),
            config.pool.connect_timeout,
            operation_timeout,
        )?;

        info!(
            host = %config.host,
            prefix = %config.prefix,
            max_size = config.pool.max_size,
            max_idle = config.pool.max_idle,
            "Initializing Redis Cache with connection pool"
        );

        Ok(Self {
            pool: Pool::new(manager, config.pool)?,
            prefix: config.prefix.clone(),
            operation_timeout,
        })
    }

    /// Create a Redis cache with default pool settings
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection string (e.g., `<redis://localhost:6379>`)
    /// * `prefix` - Key namespace, may be empty
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the URL is invalid.
    pub fn with_url(redis_url: &str, prefix: &str) -> Result<Self> {
        let config = RedisConfig {
            url: Some(redis_url.to_string()),
            prefix: prefix.to_string(),
            ..RedisConfig::default()
        };
        Self::new(&config, Duration::from_secs(3))
    }

    /// Key namespace prepended to every logical key
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn pool_state(&self) -> PoolState {
        self.pool.state()
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn physical_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    async fn query<T>(&self, op: &'static str, cmd: &redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.pool.get().await?;
        let outcome =
            tokio::time::timeout(self.operation_timeout, cmd.query_async(&mut *conn)).await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_timeout() => {
                self.pool.discard(conn);
                Err(CacheError::Timeout(op))
            }
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.pool.discard(conn);
                }
                Err(e.into())
            }
            Err(_) => {
                self.pool.discard(conn);
                Err(CacheError::Timeout(op))
            }
        }
    }

    /// Delete every key under the prefix, returning how many were removed
    async fn remove_prefixed(&self) -> Result<usize> {
        let pattern = format!("{}*", escape_glob(&self.prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<Vec<u8>>) = self.query("redis SCAN", &scan).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let count: usize = self.query("redis DEL", &del).await?;
                removed += count;
            }

            cursor = next;
            // Cursor 0 means iteration is complete
            if cursor == 0 {
                break;
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn has(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.physical_key(key));
        let count: u64 = self.query("redis EXISTS", &cmd).await?;
        Ok(count > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.physical_key(key));
        self.query("redis GET", &cmd).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.physical_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let () = self.query("redis SET", &cmd).await?;
        debug!(key = %key, ttl = ?ttl, "[Redis] Cached key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.physical_key(key));
        let _removed: u64 = self.query("redis DEL", &cmd).await?;
        Ok(())
    }

    async fn empty(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(CacheError::Config(
                "refusing to empty a Redis cache without a key prefix".to_string(),
            ));
        }
        let removed = self.remove_prefixed().await?;
        info!(prefix = %self.prefix, removed, "[Redis] Emptied cache namespace");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let ping = redis::cmd("PING");
        matches!(
            self.query::<String>("redis PING", &ping).await.as_deref(),
            Ok("PONG")
        )
    }

    fn name(&self) -> &'static str {
        "Redis"
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        info!("[Redis] Connection pool closed");
        Ok(())
    }
}

/// Redis rejects `PX 0`, so positive sub-millisecond TTLs round up
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_rounds_up() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("app:"), "app:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn test_physical_key_uses_prefix() {
        let cache = RedisCache::with_url("redis://127.0.0.1:6379", "napoleon:").unwrap();
        assert_eq!(cache.physical_key("user:42"), "napoleon:user:42");
        assert_eq!(cache.pool_state().connections, 0);
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            RedisCache::with_url("not-a-url", ""),
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_server_fails_within_deadline() {
        // Accepts sockets and never writes a byte back
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = RedisConfig {
            url: Some(format!("redis://{addr}/")),
            prefix: "silent:".to_string(),
            pool: crate::config::PoolConfig {
                connect_timeout: Duration::from_millis(300),
                ..crate::config::PoolConfig::default()
            },
            ..RedisConfig::default()
        };
        let cache = RedisCache::new(&config, Duration::from_millis(300)).unwrap();

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(10), cache.get("any"))
            .await
            .expect("operation must not hang on a silent server");
        assert!(matches!(result, Err(CacheError::Timeout(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_requires_prefix() {
        let cache = RedisCache::with_url("redis://127.0.0.1:6379", "").unwrap();
        assert!(matches!(cache.empty().await, Err(CacheError::Config(_))));
    }
}
