//! Bounded background execution for memory write-back.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Concurrency and backlog limits for write-back tasks.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
    max_backlog: usize,
}

impl SchedulerConfig {
    /// Creates a new configuration with the supplied concurrency limit and the
    /// default backlog of 256 waiting tasks.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self {
            max_concurrency,
            max_backlog: 256,
        }
    }

    /// Tasks allowed to wait for a permit beyond the running ones. Work
    /// submitted past this is rejected with [`SchedulerError::Saturated`].
    #[must_use]
    pub const fn with_max_backlog(mut self, max_backlog: usize) -> Self {
        self.max_backlog = max_backlog;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Returns the configured backlog limit.
    #[must_use]
    pub const fn max_backlog(self) -> usize {
        self.max_backlog
    }

    const fn capacity(self) -> usize {
        self.max_concurrency.get().saturating_add(self.max_backlog)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(4).expect("non-zero"))
    }
}

/// Spawns write-back work without blocking the caller, at most
/// `max_concurrency` at a time and at most `max_backlog` more waiting.
#[derive(Debug, Clone)]
pub struct WriteBackScheduler {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    pending: Arc<Pending>,
    config: SchedulerConfig,
}

/// Count of spawned tasks that have not finished yet.
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements [`Pending`] when the task ends, including by panic.
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    /// Counts the task and returns the count including it.
    fn enter(pending: &Arc<Pending>) -> (Self, usize) {
        let count = pending.count.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(Arc::clone(pending)), count)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl WriteBackScheduler {
    /// Constructs a scheduler using the provided configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = config.max_concurrency().get();
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            closed: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Pending::default()),
            config,
        }
    }

    /// Returns the associated configuration.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Returns `true` if the scheduler no longer accepts work.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting work and abandons tasks still waiting for a permit.
    /// Running tasks finish normally.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
    }

    /// Stops accepting work and waits until every queued or running task has
    /// finished.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        loop {
            let idle = self.pending.idle.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                break;
            }
            idle.await;
        }
        self.semaphore.close();
        debug!("write-back scheduler drained");
    }

    /// Number of spawned tasks that have not finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Spawns a future once a concurrency permit is available.
    ///
    /// The handle yields `None` when the scheduler was closed before the task
    /// obtained its permit.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler is closed before the
    /// task is enqueued and [`SchedulerError::Saturated`] when the backlog is
    /// full.
    pub fn spawn<F, T>(&self, future: F) -> SchedulerResult<JoinHandle<Option<T>>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        // Counted before the closed check so `shutdown` either sees this task
        // as pending or this call sees the scheduler as closed.
        let (guard, pending) = PendingGuard::enter(&self.pending);
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        if pending > self.config.capacity() {
            debug!(pending, "write-back backlog full");
            return Err(SchedulerError::Saturated);
        }

        let semaphore = Arc::clone(&self.semaphore);

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let Ok(permit) = semaphore.acquire_owned().await else {
                debug!("write-back task abandoned; scheduler closed");
                return None;
            };
            let output = future.await;
            drop(permit);
            Some(output)
        });

        Ok(handle)
    }
}

impl Default for WriteBackScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("write-back scheduler closed")]
    Closed,
    /// Every permit is taken and the backlog is full.
    #[error("write-back backlog full")]
    Saturated,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn respects_max_concurrency() {
        let config = SchedulerConfig::new(NonZeroUsize::new(2).unwrap());
        let scheduler = WriteBackScheduler::new(config);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(
                scheduler
                    .spawn(async move {
                        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap(),
            );
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn close_prevents_new_tasks() {
        let scheduler = WriteBackScheduler::default();
        scheduler.close();

        let result = scheduler.spawn(async move {});
        assert_eq!(result.unwrap_err(), SchedulerError::Closed);
    }

    #[tokio::test]
    async fn close_abandons_waiting_tasks() {
        let scheduler = WriteBackScheduler::new(SchedulerConfig::new(NonZeroUsize::new(1).unwrap()));
        let running = scheduler
            .spawn(tokio::time::sleep(Duration::from_millis(20)))
            .unwrap();
        tokio::task::yield_now().await;
        let waiting = scheduler.spawn(async { 7 }).unwrap();
        scheduler.close();

        assert!(running.await.unwrap().is_some());
        assert_eq!(waiting.await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_backlog_rejects_without_blocking() {
        let config = SchedulerConfig::new(NonZeroUsize::new(1).unwrap()).with_max_backlog(2);
        let scheduler = WriteBackScheduler::new(config);
        let gate = Arc::new(Semaphore::new(0));

        let mut accepted = Vec::new();
        for _ in 0..3 {
            let gate = Arc::clone(&gate);
            accepted.push(
                scheduler
                    .spawn(async move { drop(gate.acquire().await) })
                    .unwrap(),
            );
        }
        assert_eq!(scheduler.pending(), 3);
        assert_eq!(
            scheduler.spawn(async {}).unwrap_err(),
            SchedulerError::Saturated
        );
        assert_eq!(scheduler.pending(), 3);

        gate.add_permits(1);
        for handle in accepted {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.spawn(async {}).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn spawn_racing_shutdown_is_drained_or_rejected() {
        for _ in 0..200 {
            let scheduler = WriteBackScheduler::default();
            let ran = Arc::new(AtomicBool::new(false));

            let submitter = {
                let scheduler = scheduler.clone();
                let ran = Arc::clone(&ran);
                tokio::spawn(async move {
                    scheduler.spawn(async move { ran.store(true, Ordering::SeqCst) })
                })
            };
            scheduler.shutdown().await;

            match submitter.await.unwrap() {
                Ok(handle) => {
                    assert_eq!(handle.await.unwrap(), Some(()));
                    assert!(ran.load(Ordering::SeqCst));
                }
                Err(err) => {
                    assert_eq!(err, SchedulerError::Closed);
                    assert!(!ran.load(Ordering::SeqCst));
                }
            }
            assert_eq!(scheduler.pending(), 0);
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queued_work() {
        let scheduler = WriteBackScheduler::new(SchedulerConfig::new(NonZeroUsize::new(1).unwrap()));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let done = Arc::clone(&done);
            scheduler
                .spawn(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        scheduler.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.is_closed());
    }
}
