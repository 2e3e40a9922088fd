//! Background flush workers.
//!
//! Each worker is a tokio task that:
//! 1. Waits for a queued key (or the shutdown signal)
//! 2. Persists the *current* pending page for that key
//! 3. Repeats backend removals requested while the persist was running
//! 4. Reconciles the pending table and releases or reuses the key's slot
//!
//! A failing persist never stops a worker: the page stays pending, the key
//! keeps its slot and the same worker retries it after a backoff.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use pagestore_core::PageKey;

use super::async_store::{FlushState, Shared};
use super::pending::PendingSnapshot;

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Handles of the running flush workers.
///
/// Started once at store construction; consumed exactly once by either
/// [`join`](WorkerPool::join) (shutdown) or [`abort`](WorkerPool::abort) (drop).
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers on the current tokio runtime.
    ///
    /// Receivers are subscribed before the tasks are spawned, so a shutdown
    /// triggered before a worker first runs is not missed.
    pub(crate) fn start<P>(count: usize, shared: &Arc<Shared<P>>) -> Self
    where
        P: Send + Sync + 'static,
    {
        let handles = (0..count)
            .map(|id| {
                let shutdown = shared.lifecycle.shutdown_receiver();
                tokio::spawn(run_worker(id, Arc::clone(shared), shutdown))
            })
            .collect();
        Self { handles }
    }

    /// Waits for every worker to exit. A panicked worker is logged, not propagated.
    ///
    /// Returns the number of workers that panicked.
    pub(crate) async fn join(self) -> usize {
        let mut panicked = 0;
        for (id, handle) in self.handles.into_iter().enumerate() {
            if let Err(err) = handle.await {
                error!(worker = id, error = %err, "flush worker terminated abnormally");
                panicked += 1;
            }
        }
        panicked
    }

    /// Cancels every worker without waiting.
    pub(crate) fn abort(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn run_worker<P>(id: usize, shared: Arc<Shared<P>>, mut shutdown: watch::Receiver<bool>)
where
    P: Send + Sync + 'static,
{
    debug!(worker = id, "flush worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        if flush_next(&shared, &mut shutdown).await {
            continue;
        }
        tokio::select! {
            () = shared.wakeup.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break; // Controller dropped.
                }
            }
        }
    }

    debug!(worker = id, "flush worker stopped");
}

// ---------------------------------------------------------------------------
// Flush step
// ---------------------------------------------------------------------------

/// What a flush attempt left behind for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconciled {
    /// Nothing left to persist; the slot was released.
    Released,
    /// A newer page arrived; the key went back to the FIFO.
    Requeued,
    /// The persist failed. The key stays with this worker for another try.
    Retry { failures: u32 },
}

/// Flushes the oldest queued key, retrying it until it is persisted, removed,
/// overwritten or shutdown starts. Returns `false` if the queue was empty.
pub(crate) async fn flush_next<P>(shared: &Shared<P>, shutdown: &mut watch::Receiver<bool>) -> bool
where
    P: Send + Sync + 'static,
{
    let (key, mut snapshot) = {
        let mut state = shared.state.lock();
        let Some(key) = state.queue.pop() else {
            return false;
        };
        let snapshot = state.pending.snapshot(&key);
        (key, snapshot)
    };

    loop {
        match attempt(shared, &key, snapshot.take()).await {
            Reconciled::Released => return true,
            Reconciled::Requeued => {
                shared.wakeup.notify_one();
                return true;
            }
            Reconciled::Retry { failures } => {
                let delay = shared.config.retry_delay(failures);
                debug!(key = %key, failures, delay = ?delay, "retrying flush after backoff");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    // The page stays pending and is persisted by the drain.
                    _ = shutdown.changed() => return true,
                }
            }
        }
        snapshot = shared.state.lock().pending.snapshot(&key);
    }
}

/// One persist of `key` followed by removal replay and reconciliation.
/// No snapshot means the page was removed after it was queued.
async fn attempt<P>(shared: &Shared<P>, key: &PageKey, snapshot: Option<PendingSnapshot<P>>) -> Reconciled
where
    P: Send + Sync + 'static,
{
    let mut outcome = match &snapshot {
        Some(snapshot) => Some(shared.backend.persist(key, Arc::clone(&snapshot.page)).await),
        None => None,
    };

    let mut settled = 0;
    loop {
        let removals = {
            let mut state = shared.state.lock();
            state.queue.settle_removals(key, settled);
            let removals = state.queue.removals(key);
            if removals == 0 {
                return finish_flush(&mut state, key, snapshot.as_ref(), outcome.take());
            }
            removals
        };
        // Our persist may have landed after the caller's removal.
        if let Err(err) = shared.backend.remove(key).await {
            warn!(key = %key, error = %err, "failed to repeat removal after flush");
        }
        settled = removals;
    }
}

/// Reconciles the pending table after a flush attempt and decides what
/// happens to the key's slot. Runs under the state lock.
fn finish_flush<P>(
    state: &mut FlushState<P>,
    key: &PageKey,
    snapshot: Option<&PendingSnapshot<P>>,
    outcome: Option<anyhow::Result<()>>,
) -> Reconciled {
    if let (Some(snapshot), Some(result)) = (snapshot, outcome) {
        match result {
            Ok(()) => {
                state.pending.remove_if_unchanged(key, snapshot.generation);
            }
            Err(err) => {
                metrics::counter!("pagestore_flush_failures_total").increment(1);
                // `None` when the page was replaced or removed meanwhile.
                if let Some(failures) = state.pending.record_failure(key, snapshot.generation) {
                    warn!(key = %key, failures, error = %err, "flush failed; page stays pending");
                    return Reconciled::Retry { failures };
                }
                warn!(key = %key, error = %err, "flush failed for a page that has since changed");
            }
        }
    }

    // A remaining entry is newer than what was flushed.
    let requeued = state.queue.finish(key, state.pending.contains(key));
    record_occupancy(state);
    if requeued {
        Reconciled::Requeued
    } else {
        Reconciled::Released
    }
}

pub(crate) fn record_occupancy<P>(state: &FlushState<P>) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("pagestore_occupied_slots").set(state.queue.occupied() as f64);
}
