// Background flush and cleanup of the shared cache
// Author: kelexine (https://github.com/kelexine)

use super::manager::PersistenceManager;
use crate::cache::SharedCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drives periodic flushes, hourly TTL cleanup, flushes on idle and a final
/// flush on shutdown. Flushes are skipped when the cache revision has not
/// moved since the last successful write.
pub struct PersistenceScheduler;

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    idle: Arc<Notify>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PersistenceScheduler {
    pub fn spawn(
        manager: Arc<PersistenceManager>,
        cache: SharedCache,
        flush_interval: Duration,
        cleanup_interval: Duration,
    ) -> SchedulerHandle {
        let idle = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Whatever is in the cache now came from the store.
        let baseline = cache.lock().revision();

        let task = tokio::spawn(run(
            manager,
            cache,
            baseline,
            flush_interval,
            cleanup_interval,
            idle.clone(),
            shutdown_rx,
        ));

        info!(
            "Persistence scheduler started (flush every {:?}, cleanup every {:?})",
            flush_interval, cleanup_interval
        );

        SchedulerHandle {
            idle,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

impl SchedulerHandle {
    /// The process has gone quiet; flush soon if anything changed.
    pub fn notify_idle(&self) {
        self.idle.notify_one();
    }

    /// Stop the loop after one last flush.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Persistence scheduler task ended abnormally: {}", e);
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

async fn run(
    manager: Arc<PersistenceManager>,
    cache: SharedCache,
    baseline: u64,
    flush_interval: Duration,
    cleanup_interval: Duration,
    idle: Arc<Notify>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let start = Instant::now();
    let mut flush_tick = interval_at(start + flush_interval, flush_interval);
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cleanup_tick = interval_at(start + cleanup_interval, cleanup_interval);
    cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut flushed_revision = Some(baseline);

    loop {
        tokio::select! {
            _ = flush_tick.tick() => {
                flush_if_changed(&manager, &cache, &mut flushed_revision, "periodic").await;
            }
            _ = cleanup_tick.tick() => {
                match manager.cleanup(&cache).await {
                    // The store now holds this snapshot; later flushes compare against it.
                    Ok(outcome) => flushed_revision = Some(outcome.flushed.revision),
                    Err(e) => warn!("Cache cleanup failed: {}", e),
                }
            }
            _ = idle.notified() => {
                flush_if_changed(&manager, &cache, &mut flushed_revision, "idle").await;
            }
            _ = &mut shutdown => {
                flush_if_changed(&manager, &cache, &mut flushed_revision, "shutdown").await;
                break;
            }
        }
    }

    debug!("Persistence scheduler stopped");
}

async fn flush_if_changed(
    manager: &PersistenceManager,
    cache: &SharedCache,
    flushed_revision: &mut Option<u64>,
    reason: &str,
) {
    let current = cache.lock().revision();
    if *flushed_revision == Some(current) {
        debug!("Skipping {} flush, cache unchanged", reason);
        return;
    }

    match manager.flush_cache(cache).await {
        Ok(outcome) => {
            debug!("{} flush wrote {} entries", reason, outcome.entries);
            *flushed_revision = Some(outcome.revision);
        }
        Err(e) => warn!("{} flush failed, keeping data in memory: {}", reason, e),
    }
}
