//! Maintenance Scheduler
//!
//! Periodic compaction for backends that advertise a [`Compactor`].
//! Backends without one are simply not scheduled.

use crate::config::MaintenanceConfig;
use crate::error::{CacheError, Result};
use crate::traits::{CacheBackend, CompactionOutcome, Compactor};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Statistics for maintenance runs
#[derive(Debug, Default, Clone, Copy)]
pub struct MaintenanceStats {
    /// Compaction passes started, scheduled or manual
    pub runs: u64,
    /// Passes that rewrote the store
    pub compacted: u64,
    /// Passes below the discard threshold
    pub skipped: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct AtomicMaintenanceStats {
    runs: AtomicU64,
    compacted: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

impl AtomicMaintenanceStats {
    fn snapshot(&self) -> MaintenanceStats {
        MaintenanceStats {
            runs: self.runs.load(Ordering::Relaxed),
            compacted: self.compacted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Registers recurring compaction jobs
pub struct MaintenanceScheduler;

impl MaintenanceScheduler {
    /// Start periodic compaction for `backend`
    ///
    /// Returns `None` and schedules nothing when the backend has no
    /// compaction capability. Otherwise the first pass runs one
    /// `compaction_interval` from now and then on every interval. A failed
    /// pass is logged and counted; the next tick runs normally.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// handle stops the job just like [`MaintenanceHandle::shutdown`].
    #[must_use = "dropping the handle stops the maintenance job"]
    pub fn register(
        backend: &dyn CacheBackend,
        config: MaintenanceConfig,
    ) -> Option<MaintenanceHandle> {
        let Some(compactor) = backend.compactor() else {
            debug!(backend = backend.name(), "Backend has no compactor, maintenance not scheduled");
            return None;
        };

        let stats = Arc::new(AtomicMaintenanceStats::default());
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            backend = backend.name(),
            interval = ?config.compaction_interval,
            discard_ratio = config.discard_ratio,
            "Scheduling cache compaction"
        );

        let task = spawn_loop(
            Arc::clone(&compactor),
            config,
            Arc::clone(&stats),
            shutdown_tx.subscribe(),
        );

        Some(MaintenanceHandle {
            compactor,
            config,
            stats,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a running maintenance job
pub struct MaintenanceHandle {
    compactor: Arc<dyn Compactor>,
    config: MaintenanceConfig,
    stats: Arc<AtomicMaintenanceStats>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Get a snapshot of current statistics
    #[must_use]
    pub fn stats(&self) -> MaintenanceStats {
        self.stats.snapshot()
    }

    /// Run one compaction pass now, outside the schedule
    ///
    /// # Errors
    ///
    /// Returns the compactor's error, or [`CacheError::Storage`] if the
    /// blocking task could not complete.
    pub async fn run_now(&self) -> Result<CompactionOutcome> {
        run_pass(Arc::clone(&self.compactor), self.config.discard_ratio, &self.stats).await
    }

    /// Whether the background job has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the job to stop
    ///
    /// Returns immediately and the job exits at its next await point. A
    /// compaction already running on the blocking pool cannot be interrupted
    /// and is left to finish on its own; dropping the tokio runtime still
    /// waits for it. Callers that must exit promptly should stop their
    /// runtime with `Runtime::shutdown_timeout` or `Runtime::shutdown_background`.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn spawn_loop(
    compactor: Arc<dyn Compactor>,
    config: MaintenanceConfig,
    stats: Arc<AtomicMaintenanceStats>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.compaction_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pass = run_pass(Arc::clone(&compactor), config.discard_ratio, &stats);
                    tokio::select! {
                        _ = pass => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        info!(compactor = compactor.name(), "Maintenance scheduler shutting down");
    })
}

async fn run_pass(
    compactor: Arc<dyn Compactor>,
    discard_ratio: f64,
    stats: &AtomicMaintenanceStats,
) -> Result<CompactionOutcome> {
    stats.runs.fetch_add(1, Ordering::Relaxed);
    let name = compactor.name();
    let started = Instant::now();

    let result = tokio::task::spawn_blocking(move || compactor.compact(discard_ratio))
        .await
        .map_err(CacheError::from)
        .and_then(|outcome| outcome);

    match &result {
        Ok(CompactionOutcome::Compacted { discard_ratio }) => {
            stats.compacted.fetch_add(1, Ordering::Relaxed);
            info!(
                compactor = name,
                discard_ratio,
                elapsed = ?started.elapsed(),
                "Compaction reclaimed stale space"
            );
        }
        Ok(CompactionOutcome::Skipped { discard_ratio }) => {
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(compactor = name, discard_ratio, "Compaction skipped, below threshold");
        }
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(compactor = name, error = %e, "Compaction failed");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCompactor {
        calls: AtomicU64,
        finished: AtomicU64,
        failing: AtomicBool,
        delay_ms: AtomicU64,
    }

    impl Compactor for FakeCompactor {
        fn compact(&self, discard_ratio: f64) -> Result<CompactionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                std::thread::sleep(Duration::from_millis(delay));
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Compaction("disk on fire".into()));
            }
            if discard_ratio <= 0.5 {
                Ok(CompactionOutcome::Compacted { discard_ratio: 0.5 })
            } else {
                Ok(CompactionOutcome::Skipped { discard_ratio: 0.5 })
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Backend stub; only the capability query matters here
    struct StubBackend {
        compactor: Option<Arc<FakeCompactor>>,
    }

    #[async_trait]
    impl CacheBackend for StubBackend {
        async fn has(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn empty(&self) -> Result<()> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn compactor(&self) -> Option<Arc<dyn Compactor>> {
            self.compactor
                .as_ref()
                .map(|c| Arc::clone(c) as Arc<dyn Compactor>)
        }
    }

    fn config(interval_ms: u64, discard_ratio: f64) -> MaintenanceConfig {
        MaintenanceConfig {
            compaction_interval: Duration::from_millis(interval_ms),
            discard_ratio,
        }
    }

    #[tokio::test]
    async fn test_no_compactor_registers_nothing() {
        let backend = StubBackend { compactor: None };
        assert!(MaintenanceScheduler::register(&backend, config(10, 0.5)).is_none());
    }

    #[tokio::test]
    async fn test_runs_periodically() {
        let compactor = Arc::new(FakeCompactor::default());
        let backend = StubBackend {
            compactor: Some(Arc::clone(&compactor)),
        };

        let handle = MaintenanceScheduler::register(&backend, config(40, 0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let stats = handle.stats();
        assert!(stats.runs >= 2, "expected repeated runs, got {stats:?}");
        assert_eq!(stats.compacted, stats.runs);
        assert_eq!(compactor.calls.load(Ordering::SeqCst), stats.runs);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_first_run_waits_one_interval() {
        let compactor = Arc::new(FakeCompactor::default());
        let backend = StubBackend {
            compactor: Some(Arc::clone(&compactor)),
        };

        let handle = MaintenanceScheduler::register(&backend, config(60_000, 0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.stats().runs, 0);
        assert_eq!(compactor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_schedule() {
        let compactor = Arc::new(FakeCompactor::default());
        compactor.failing.store(true, Ordering::SeqCst);
        let backend = StubBackend {
            compactor: Some(Arc::clone(&compactor)),
        };

        let handle = MaintenanceScheduler::register(&backend, config(30, 0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = handle.stats();
        assert!(stats.failures >= 2, "expected repeated failures, got {stats:?}");
        assert!(!handle.is_finished());

        compactor.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.stats().compacted >= 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_run_now_reports_outcome() {
        let backend = StubBackend {
            compactor: Some(Arc::new(FakeCompactor::default())),
        };

        let handle = MaintenanceScheduler::register(&backend, config(60_000, 0.9)).unwrap();
        let outcome = handle.run_now().await.unwrap();

        assert_eq!(outcome, CompactionOutcome::Skipped { discard_ratio: 0.5 });
        let stats = handle.stats();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_job() {
        let compactor = Arc::new(FakeCompactor::default());
        let backend = StubBackend {
            compactor: Some(Arc::clone(&compactor)),
        };

        let handle = MaintenanceScheduler::register(&backend, config(20, 0.5)).unwrap();
        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.is_finished());
        let calls = compactor.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(compactor.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_does_not_wait_for_running_pass() {
        let compactor = Arc::new(FakeCompactor::default());
        compactor.delay_ms.store(600, Ordering::SeqCst);
        let backend = StubBackend {
            compactor: Some(Arc::clone(&compactor)),
        };

        let handle = MaintenanceScheduler::register(&backend, config(20, 0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(compactor.calls.load(Ordering::SeqCst), 1);

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_finished());
        assert_eq!(compactor.finished.load(Ordering::SeqCst), 0);
    }
}
