//! Single-concurrency eviction executor
//!
//! Every trigger enqueues one eviction pass; one worker task drains the queue
//! so at most one pass touches the cache directory at a time. Callers can wait
//! for the queue to drain to know eviction has settled.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use super::CacheStore;

/// Handle to the eviction worker
pub(crate) struct EvictionQueue {
    jobs: mpsc::UnboundedSender<()>,
    pending: Arc<watch::Sender<usize>>,
}

impl EvictionQueue {
    /// Spawn the worker; it exits once the queue handle is dropped
    pub(crate) fn spawn(store: Arc<CacheStore>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<()>();
        let pending = Arc::new(watch::Sender::new(0usize));
        let worker_pending = Arc::clone(&pending);

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match evict(&store).await {
                    Ok(0) => {}
                    Ok(removed) => info!("Evicted {} cache entries", removed),
                    Err(e) => error!("Cache eviction failed: {}", e),
                }
                worker_pending.send_modify(|n| *n = n.saturating_sub(1));
            }
        });

        Self { jobs, pending }
    }

    /// Enqueue one eviction pass
    pub(crate) fn submit(&self) {
        self.pending.send_modify(|n| *n += 1);
        if self.jobs.send(()).is_err() {
            // Worker is gone; nothing will ever drain this job
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    /// Wait until no eviction pass is queued or running
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // Sender is owned by self, so wait_for cannot observe a closed channel
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Delete least-recently-accessed entries until the indexed total fits the budget
///
/// The running total is decremented per deletion rather than re-summed.
async fn evict(store: &CacheStore) -> crate::error::Result<usize> {
    let mut total = store.index.total_bytes().await?;
    let mut removed = 0;

    while total > store.limit_bytes {
        let Some(oldest) = store.index.oldest_accessed().await? else {
            break;
        };

        store.remove_entry(&oldest.hash).await?;
        total = total.saturating_sub(u64::try_from(oldest.bytes).unwrap_or(0));
        removed += 1;

        info!(
            "Evicted cache entry {} ({} bytes, {} bytes remaining of {})",
            oldest.hash, oldest.bytes, total, store.limit_bytes
        );
    }

    Ok(removed)
}
