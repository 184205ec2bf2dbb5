//! Periodic background compaction of the embedding store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use recall_memory::EmbeddingStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle to a running compaction loop.
///
/// Each pass calls [`EmbeddingStore::optimize_memory`], which takes the same
/// write lock as inserts.
#[derive(Debug)]
pub struct CompactionTask {
    shutdown: watch::Sender<bool>,
    passes: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl CompactionTask {
    /// Starts compacting `store` every `interval`. The first pass runs one
    /// interval after start.
    #[must_use]
    pub fn spawn(store: Arc<EmbeddingStore>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let passes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&passes);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = store.optimize_memory().await;
                        counter.fetch_add(1, Ordering::Relaxed);
                        if !report.is_noop() {
                            info!(
                                entries_before = report.entries_before,
                                entries_after = report.entries_after,
                                memory_reduction = report.memory_reduction,
                                "periodic compaction pass"
                            );
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("compaction task stopped");
        });

        Self {
            shutdown,
            passes,
            handle,
        }
    }

    /// Completed passes.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Stops the loop and waits for an in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            debug!(error = %err, "compaction task ended abnormally");
        }
    }
}
