//! Bounded, health-checked connection pool
//!
//! A thin policy layer over [`deadpool::managed::Pool`]. The connection type
//! comes from a [`Manager`] implementation, so the pooling rules can be
//! exercised without a live server. [`RedisCache`](crate::RedisCache) is the
//! production user.
//!
//! # Rules
//!
//! - At most `max_size` connections exist at once (idle + checked out).
//!   A checkout beyond that waits up to `wait_timeout`, then fails with
//!   [`CacheError::PoolExhausted`].
//! - Dialing a connection is bounded by `connect_timeout`, and so is the
//!   liveness probe run before an idle connection is reused.
//! - A failed probe discards the connection and the checkout moves on to the
//!   next idle one or dials fresh.
//! - Idle connections older than `idle_timeout`, and idle connections beyond
//!   `max_idle`, are closed at the start of every checkout.
//! - A connection handed to [`Pool::discard`] is never returned to the idle set.
//! - Dropping a checkout future releases its wait slot.

use crate::config::PoolConfig;
use crate::error::{CacheError, Result};
use deadpool::Runtime;
use deadpool::managed::{self, Manager, Object, PoolError, TimeoutType};
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A checked-out connection
///
/// Dereferences to the underlying connection and goes back to the pool on
/// drop. Pass it to [`Pool::discard`] after a transport failure so it is
/// closed instead of reused.
pub type PooledConnection<M> = Object<M>;

/// Point-in-time view of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub max_size: usize,
    /// Live connections, idle or checked out
    pub connections: usize,
    pub idle_connections: usize,
    /// Checkouts currently waiting for a slot
    pub waiting: usize,
}

/// Cumulative pool counters
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_discarded: u64,
    pub connections_reaped: u64,
    pub dial_failures: u64,
    pub checkouts_exhausted: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_reused: AtomicU64,
    connections_discarded: AtomicU64,
    connections_reaped: AtomicU64,
    dial_failures: AtomicU64,
    checkouts_exhausted: AtomicU64,
}

impl AtomicPoolStats {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_reused: self.connections_reused.load(Ordering::Relaxed),
            connections_discarded: self.connections_discarded.load(Ordering::Relaxed),
            connections_reaped: self.connections_reaped.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            checkouts_exhausted: self.checkouts_exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Bounded connection pool
///
/// Cheap to clone; clones share the same connections.
pub struct Pool<M: Manager<Error = CacheError>> {
    inner: managed::Pool<M>,
    config: PoolConfig,
    stats: Arc<AtomicPoolStats>,
}

impl<M: Manager<Error = CacheError>> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: self.config,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<M: Manager<Error = CacheError>> Pool<M> {
    /// Create an empty pool; connections are dialed lazily on checkout
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the pool cannot be built.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self> {
        let inner = managed::Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(Some(config.wait_timeout))
            .create_timeout(Some(config.connect_timeout))
            .recycle_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Config(format!("connection pool: {e}")))?;

        Ok(Self {
            inner,
            config,
            stats: Arc::new(AtomicPoolStats::default()),
        })
    }

    /// Check out a connection
    ///
    /// The connection goes back to the pool when the returned guard is
    /// dropped, whatever the outcome of the operation.
    ///
    /// # Errors
    ///
    /// - [`CacheError::PoolExhausted`] if no slot frees up within `wait_timeout`
    /// - [`CacheError::Timeout`] if dialing or probing exceeds `connect_timeout`
    /// - the manager's error if dialing fails
    /// - [`CacheError::Connection`] if the pool was closed
    pub async fn get(&self) -> Result<PooledConnection<M>> {
        self.reap();
        let started = Instant::now();

        match self.inner.get().await {
            Ok(conn) => {
                let counter = if Object::metrics(&conn).recycle_count == 0 {
                    &self.stats.connections_created
                } else {
                    &self.stats.connections_reused
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Err(PoolError::Timeout(TimeoutType::Wait)) => {
                self.stats.checkouts_exhausted.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::PoolExhausted {
                    max_size: self.config.max_size,
                    waited: started.elapsed(),
                })
            }
            Err(PoolError::Timeout(TimeoutType::Create)) => {
                self.stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                warn!(timeout = ?self.config.connect_timeout, "Timed out dialing connection");
                Err(CacheError::Timeout("connection dial"))
            }
            Err(PoolError::Timeout(TimeoutType::Recycle)) => {
                debug!(timeout = ?self.config.connect_timeout, "Liveness probe timed out");
                Err(CacheError::Timeout("connection probe"))
            }
            Err(PoolError::Backend(e)) => {
                self.stats.dial_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to dial connection");
                Err(e)
            }
            Err(PoolError::Closed) => {
                Err(CacheError::Connection("connection pool is closed".to_string()))
            }
            Err(e) => Err(CacheError::Connection(e.to_string())),
        }
    }

    /// Close a checked-out connection instead of returning it to the pool
    pub fn discard(&self, conn: PooledConnection<M>) {
        drop(Object::take(conn));
        self.stats.connections_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Close idle connections past `idle_timeout` or beyond `max_idle`
    fn reap(&self) {
        let idle_timeout = self.config.idle_timeout;
        let excess = Cell::new(
            self.inner
                .status()
                .available
                .saturating_sub(self.config.max_idle),
        );

        let result = self.inner.retain(|_, metrics| {
            if metrics.last_used() >= idle_timeout {
                return false;
            }
            if excess.get() > 0 {
                excess.set(excess.get() - 1);
                return false;
            }
            true
        });

        let reaped = result.removed.len();
        if reaped > 0 {
            self.stats
                .connections_reaped
                .fetch_add(reaped as u64, Ordering::Relaxed);
            debug!(reaped, "Closed idle connections");
        }
    }

    /// Close the pool
    ///
    /// Idle connections are dropped immediately, checked-out connections are
    /// dropped when returned, and pending or future checkouts fail.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    #[must_use]
    pub fn state(&self) -> PoolState {
        let status = self.inner.status();
        PoolState {
            max_size: status.max_size,
            connections: status.size,
            idle_connections: status.available,
            waiting: status.waiting,
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// The connection manager
    #[must_use]
    pub fn manager(&self) -> &M {
        self.inner.manager()
    }

    /// Configured checkout wait deadline
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        self.config.wait_timeout
    }
}
