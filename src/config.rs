//! Cache configuration.
//!
//! Configuration is resolved once at startup, usually from environment
//! variables, and then handed to [`CacheSystem`](crate::CacheSystem).

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which backend serves the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Remote Redis reached through a connection pool.
    Redis,
    /// Local RocksDB directory.
    RocksDb,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" | "remote" => Ok(Self::Redis),
            "rocksdb" | "embedded" | "badger" => Ok(Self::RocksDb),
            other => Err(CacheError::Config(format!("unknown cache backend: {other}"))),
        }
    }
}

/// Payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    Json,
    MsgPack,
}

impl FromStr for CodecKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::MsgPack),
            other => Err(CacheError::Config(format!("unknown cache codec: {other}"))),
        }
    }
}

/// Connection pool bounds
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of live connections (idle + checked out)
    pub max_size: usize,
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,
    /// How long a checkout waits for a free slot before `PoolExhausted`
    pub wait_timeout: Duration,
    /// Deadline for dialing a new connection
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 64,
            max_idle: 50,
            idle_timeout: Duration::from_secs(240),
            wait_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Remote (Redis) backend settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Full connection URL; overrides `host` and `password` when set
    pub url: Option<String>,
    /// `host:port`
    pub host: String,
    pub password: Option<String>,
    /// Prepended to every key before it reaches Redis
    pub prefix: String,
    pub pool: PoolConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1:6379".to_string(),
            password: None,
            prefix: String::new(),
            pool: PoolConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Connection URL for the Redis client
    ///
    /// The password is percent-encoded into the userinfo part.
    #[cfg(feature = "redis")]
    #[must_use]
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{}@{}/", urlencoding::encode(password), self.host),
            None => format!("redis://{}/", self.host),
        }
    }
}

/// Embedded (RocksDB) backend settings
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Directory holding the store; created if missing
    pub path: PathBuf,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./tmp/cache"),
        }
    }
}

/// Scheduled compaction settings
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    pub compaction_interval: Duration,
    /// Compact when at least this fraction of the store is stale
    pub discard_ratio: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            compaction_interval: Duration::from_secs(24 * 60 * 60),
            discard_ratio: 0.7,
        }
    }
}

/// Complete cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub codec: CodecKind,
    /// Deadline applied to every individual backend operation
    pub operation_timeout: Duration,
    pub redis: RedisConfig,
    pub rocksdb: RocksDbConfig,
    pub maintenance: MaintenanceConfig,
}

impl CacheConfig {
    /// Defaults for the given backend
    #[must_use]
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            codec: CodecKind::default(),
            operation_timeout: Duration::from_secs(3),
            redis: RedisConfig::default(),
            rocksdb: RocksDbConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }

    /// Redis defaults with the given URL
    #[must_use]
    pub fn redis(url: impl Into<String>) -> Self {
        let mut config = Self::new(BackendKind::Redis);
        config.redis.url = Some(url.into());
        config
    }

    /// RocksDB defaults at the given path
    #[must_use]
    pub fn rocksdb(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(BackendKind::RocksDb);
        config.rocksdb.path = path.into();
        config
    }

    /// Read configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if `CACHE` is missing or any value fails
    /// to parse or validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] on missing backend selection or invalid values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend: BackendKind = var("CACHE")
            .ok_or_else(|| CacheError::Config("CACHE is not set".to_string()))?
            .parse()?;
        let mut config = Self::new(backend);

        if let Some(codec) = var("CACHE_CODEC") {
            config.codec = codec.parse()?;
        }
        if let Some(ms) = parse_var::<u64>(&var, "CACHE_OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Duration::from_millis(ms);
        }

        config.redis.url = var("REDIS_URL");
        if let Some(host) = var("REDIS_HOST") {
            config.redis.host = host;
        }
        config.redis.password = var("REDIS_PASSWORD");
        config.redis.prefix = var("REDIS_PREFIX").unwrap_or_default();

        let pool = &mut config.redis.pool;
        if let Some(n) = parse_var(&var, "CACHE_POOL_MAX_SIZE")? {
            pool.max_size = n;
        }
        match parse_var(&var, "CACHE_POOL_MAX_IDLE")? {
            Some(n) => pool.max_idle = n,
            None => pool.max_idle = pool.max_idle.min(pool.max_size),
        }
        if let Some(secs) = parse_var(&var, "CACHE_POOL_IDLE_TIMEOUT_SECS")? {
            pool.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&var, "CACHE_POOL_WAIT_TIMEOUT_MS")? {
            pool.wait_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&var, "CACHE_CONNECT_TIMEOUT_MS")? {
            pool.connect_timeout = Duration::from_millis(ms);
        }

        if let Some(path) = var("CACHE_EMBEDDED_PATH") {
            config.rocksdb.path = PathBuf::from(path);
        }

        if let Some(secs) = parse_var(&var, "CACHE_COMPACTION_INTERVAL_SECS")? {
            config.maintenance.compaction_interval = Duration::from_secs(secs);
        }
        if let Some(ratio) = parse_var(&var, "CACHE_COMPACTION_RATIO")? {
            config.maintenance.discard_ratio = ratio;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let pool = &self.redis.pool;
        if pool.max_size == 0 {
            return Err(CacheError::Config("pool max_size must be at least 1".to_string()));
        }
        if pool.max_idle > pool.max_size {
            return Err(CacheError::Config(format!(
                "pool max_idle ({}) exceeds max_size ({})",
                pool.max_idle, pool.max_size
            )));
        }
        if self.operation_timeout.is_zero()
            || pool.wait_timeout.is_zero()
            || pool.connect_timeout.is_zero()
        {
            return Err(CacheError::Config("timeouts must be non-zero".to_string()));
        }
        if self.maintenance.compaction_interval.is_zero() {
            return Err(CacheError::Config("compaction interval must be non-zero".to_string()));
        }
        let ratio = self.maintenance.discard_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CacheError::Config(format!(
                "compaction ratio must be within 0.0..=1.0, got {ratio}"
            )));
        }
        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| CacheError::Config(format!("{name}={raw}: {e}")))
        })
        .transpose()
}
