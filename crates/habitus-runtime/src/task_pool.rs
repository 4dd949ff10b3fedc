//! [`TaskPool`] – bounded set of background recognition cycles.
//!
//! Cycles are fire-and-forget from the caller's point of view, but they are
//! never detached: every spawned future lives in a [`JoinSet`] so that
//! shutdown can wait for in-flight writes to finish (or abort them after a
//! deadline) instead of dropping them mid-cycle.
//!
//! A [`Semaphore`] caps how many cycles may be in flight. When the pool is
//! full, [`TaskPool::spawn`] refuses the work rather than queueing it; the
//! execution is already logged, and the next trigger will see it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of [`TaskPool::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that ran to completion (or panicked) before the deadline.
    pub completed: usize,
    /// Tasks aborted because the deadline passed.
    pub aborted: usize,
}

pub struct TaskPool {
    tasks: Mutex<JoinSet<()>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    closed: AtomicBool,
}

impl TaskPool {
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn `task` on the current Tokio runtime.
    ///
    /// Returns `false` without running it when the pool is full or closed.
    /// Must be called from within a runtime.
    pub fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // `closed` is read under the lock so a task cannot slip into the set
        // that `drain` has already taken.
        let Ok(mut tasks) = self.tasks.lock() else {
            error!("task pool lock poisoned");
            return false;
        };
        if self.closed.load(Ordering::Acquire) {
            debug!("task pool closed; task refused");
            return false;
        }
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(max_in_flight = self.max_in_flight, "task pool full; task refused");
            return false;
        };
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            task.await;
            drop(permit);
        });
        true
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Close the pool, wait up to `timeout` for in-flight tasks, then abort
    /// whatever is left.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *guard)
        };

        let mut report = DrainReport::default();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "background task panicked");
                        }
                    }
                    report.completed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = tasks.len();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        info!(completed = report.completed, aborted = report.aborted, "task pool drained");
        report
    }

    /// Close the pool and abort every task immediately.
    pub fn cancel_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            self.closed.store(true, Ordering::Release);
            let n = tasks.len();
            tasks.abort_all();
            if n > 0 {
                warn!(aborted = n, "background tasks cancelled");
            }
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn spawn_during_drain_is_refused() {
        let pool = Arc::new(TaskPool::new(2));
        let release = Arc::new(Notify::new());
        let waiter = Arc::clone(&release);
        assert!(pool.spawn(async move { waiter.notified().await }));

        let drainer = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.drain(Duration::from_secs(5)).await })
        };
        while !pool.closed.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        assert!(!pool.spawn(async {}));
        assert!(pool.tasks.lock().unwrap().is_empty());

        release.notify_one();
        let report = drainer.await.unwrap();
        assert_eq!(report, DrainReport { completed: 1, aborted: 0 });
    }

    #[tokio::test]
    async fn spawned_tasks_complete_on_drain() {
        let pool = TaskPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            assert!(pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let report = pool.drain(Duration::from_secs(5)).await;
        assert_eq!(report, DrainReport { completed: 3, aborted: 0 });
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn full_pool_refuses_work() {
        let pool = TaskPool::new(2);
        let gate = Arc::new(Notify::new());
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            assert!(pool.spawn(async move { gate.notified().await }));
        }
        assert_eq!(pool.in_flight(), 2);
        assert!(!pool.spawn(async {}));

        pool.cancel_all();
    }

    #[tokio::test]
    async fn permits_return_after_completion() {
        let pool = TaskPool::new(1);
        assert!(pool.spawn(async {}));
        for _ in 0..100 {
            if pool.in_flight() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.spawn(async {}));
        pool.drain(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stragglers() {
        let pool = TaskPool::new(4);
        assert!(pool.spawn(async {}));
        assert!(pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));

        let report = pool.drain(Duration::from_secs(20)).await;
        assert_eq!(report, DrainReport { completed: 1, aborted: 1 });
        assert!(!pool.spawn(async {}), "drained pool stays closed");
    }

    #[tokio::test]
    async fn cancelled_pool_refuses_work() {
        let pool = TaskPool::default();
        pool.cancel_all();
        assert!(!pool.spawn(async {}));
        assert_eq!(pool.drain(Duration::from_millis(10)).await, DrainReport::default());
    }
}
