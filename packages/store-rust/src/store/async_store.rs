//! Write-behind decorator over a slow [`PageStore`].
//!
//! [`AsyncPageStore`] acknowledges writes after in-memory bookkeeping and
//! leaves persistence to background workers, as long as fewer than
//! `capacity` distinct keys are waiting. Reads of a page that is still
//! pending are answered from memory with the very `Arc` that was stored.
//! When every slot is taken, a write to a new key is persisted on the
//! caller's task instead, so buffered work never grows past the configured
//! bound.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use pagestore_core::{ManageablePage, PageId, PageKey, PageStore};

use super::pending::{Generation, PendingTable};
use super::queue::{Admission, TaskQueue};
use super::worker::{record_occupancy, WorkerPool};
use crate::config::AsyncStoreConfig;
use crate::error::{DrainFailure, StoreError};
use crate::lifecycle::{LifecycleController, StoreState};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the façade and its workers mutate together. Always accessed
/// under [`Shared::state`], so admission and flush reconciliation are single
/// critical sections.
pub(crate) struct FlushState<P> {
    pub(crate) pending: PendingTable<P>,
    pub(crate) queue: TaskQueue,
}

pub(crate) struct Shared<P>
where
    P: Send + Sync + 'static,
{
    pub(crate) state: Mutex<FlushState<P>>,
    pub(crate) backend: Arc<dyn PageStore<P>>,
    pub(crate) wakeup: Notify,
    /// Signalled whenever a synchronous writer unregisters.
    pub(crate) released: Notify,
    pub(crate) lifecycle: LifecycleController,
    pub(crate) config: AsyncStoreConfig,
}

/// Registration of a synchronous writer in the task queue. Dropping it
/// unregisters the writer, hands a deferred write over to the workers and
/// wakes callers waiting on the key, also when the writing future is
/// cancelled.
struct BlockingWrite<'a, P>
where
    P: Send + Sync + 'static,
{
    shared: &'a Shared<P>,
    key: PageKey,
}

impl<P> Drop for BlockingWrite<'_, P>
where
    P: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let requeued = self.shared.state.lock().queue.end_blocking(&self.key);
        if requeued {
            self.shared.wakeup.notify_one();
        }
        self.shared.released.notify_waiters();
    }
}

// ---------------------------------------------------------------------------
// AsyncPageStore
// ---------------------------------------------------------------------------

/// Point-in-time counters of an [`AsyncPageStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Pages held in memory awaiting persistence.
    pub pending: usize,
    /// Keys waiting in the queue.
    pub queued: usize,
    /// Distinct keys holding a slot (queued, flushing or deferred).
    pub occupied: usize,
    /// Keys with a synchronous write in flight.
    pub blocking: usize,
    /// Configured slot count.
    pub capacity: usize,
}

/// Bounded write-behind decorator over an underlying [`PageStore`].
///
/// Must be created inside a tokio runtime: construction spawns the flush
/// workers. Call [`shutdown`](AsyncPageStore::shutdown) to persist pending
/// pages and release the workers; dropping the store without it discards
/// whatever is still pending.
pub struct AsyncPageStore<P>
where
    P: Send + Sync + 'static,
{
    shared: Arc<Shared<P>>,
    workers: Mutex<Option<WorkerPool>>,
    drain_timeout: Duration,
}

impl<P> AsyncPageStore<P>
where
    P: Send + Sync + 'static,
{
    /// Wraps `backend` and starts `config.worker_count` flush workers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: AsyncStoreConfig, backend: Arc<dyn PageStore<P>>) -> Result<Self, StoreError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(FlushState {
                pending: PendingTable::new(),
                queue: TaskQueue::new(config.capacity),
            }),
            backend,
            wakeup: Notify::new(),
            released: Notify::new(),
            lifecycle: LifecycleController::new(),
            config: config.clone(),
        });
        let workers = WorkerPool::start(config.worker_count, &shared);

        info!(
            capacity = config.capacity,
            workers = config.worker_count,
            "async page store started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(Some(workers)),
            drain_timeout: config.drain_timeout,
        })
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.shared.lifecycle.state() == StoreState::Stopped {
            Err(StoreError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Stores `page` under `(session_id, page_id)`.
    ///
    /// Returns as soon as the page is pending if the key already holds a slot
    /// or a free slot exists; otherwise persists synchronously. A second
    /// synchronous write of the same key waits for the first to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persist`] if a synchronous persist fails and
    /// [`StoreError::ShutDown`] after shutdown. Failures of background
    /// flushes are logged, never returned here.
    pub async fn store(&self, session_id: &str, page_id: PageId, page: Arc<P>) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = PageKey::new(session_id, page_id);

        let (admission, generation) = loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let admitted = {
                let mut state = self.shared.state.lock();
                let admission = state.queue.admit(&key);
                let generation = match admission {
                    Admission::Enqueued | Admission::Deferred | Admission::Coalesced => {
                        Some(state.pending.put(key.clone(), Arc::clone(&page)))
                    }
                    // Only while draining: the older page must not be drained after this one.
                    Admission::Full if state.pending.contains(&key) => {
                        Some(state.pending.put(key.clone(), Arc::clone(&page)))
                    }
                    Admission::Full | Admission::Busy => None,
                };
                record_occupancy(&state);
                (admission, generation)
            };
            if admitted.0 != Admission::Busy {
                break admitted;
            }
            debug!(key = %key, "waiting for synchronous write of the same key");
            released.await;
        };

        match admission {
            Admission::Enqueued => {
                metrics::counter!("pagestore_writes_total", "path" => "async").increment(1);
                self.shared.wakeup.notify_one();
                Ok(())
            }
            Admission::Deferred => {
                metrics::counter!("pagestore_writes_total", "path" => "async").increment(1);
                Ok(())
            }
            Admission::Coalesced => {
                metrics::counter!("pagestore_writes_total", "path" => "coalesced").increment(1);
                Ok(())
            }
            Admission::Full => self.store_blocking(key, page, generation).await,
            Admission::Busy => unreachable!("busy admissions are retried"),
        }
    }

    /// Stores a page under the id it reports itself.
    ///
    /// # Errors
    ///
    /// Same as [`store`](AsyncPageStore::store).
    pub async fn store_page(&self, session_id: &str, page: Arc<P>) -> Result<(), StoreError>
    where
        P: ManageablePage,
    {
        let page_id = page.page_id();
        self.store(session_id, page_id, page).await
    }

    /// Synchronous fallback. The caller is already registered as a blocking
    /// writer by `admit`.
    async fn store_blocking(
        &self,
        key: PageKey,
        page: Arc<P>,
        generation: Option<Generation>,
    ) -> Result<(), StoreError> {
        let _in_flight = self.shared.lifecycle.in_flight_guard();
        let _registration = BlockingWrite {
            shared: &self.shared,
            key: key.clone(),
        };
        metrics::counter!("pagestore_writes_total", "path" => "sync").increment(1);
        debug!(key = %key, "no free flush slot; persisting synchronously");

        match self.shared.backend.persist(&key, page).await {
            Ok(()) => {
                if let Some(generation) = generation {
                    self.shared
                        .state
                        .lock()
                        .pending
                        .remove_if_unchanged(&key, generation);
                }
                Ok(())
            }
            Err(source) => Err(StoreError::Persist { key, source }),
        }
    }

    /// Returns the page stored under `(session_id, page_id)`.
    ///
    /// A pending page is returned as the same `Arc` that was stored, without
    /// touching the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the underlying read fails and
    /// [`StoreError::ShutDown`] after shutdown.
    pub async fn retrieve(&self, session_id: &str, page_id: PageId) -> Result<Option<Arc<P>>, StoreError> {
        self.ensure_open()?;
        let key = PageKey::new(session_id, page_id);

        let (pending, removed) = {
            let state = self.shared.state.lock();
            (state.pending.get(&key), state.queue.is_removed(&key))
        };
        if let Some(page) = pending {
            metrics::counter!("pagestore_reads_total", "source" => "pending").increment(1);
            return Ok(Some(page));
        }
        // A flush in flight may have written the page back after it was removed.
        if removed {
            metrics::counter!("pagestore_reads_total", "source" => "removed").increment(1);
            return Ok(None);
        }

        let _in_flight = self.shared.lifecycle.in_flight_guard();
        metrics::counter!("pagestore_reads_total", "source" => "backend").increment(1);
        self.shared
            .backend
            .read(&key)
            .await
            .map_err(|source| StoreError::Read { key, source })
    }

    /// Removes the page stored under `(session_id, page_id)`, pending or not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Remove`] if the underlying removal fails and
    /// [`StoreError::ShutDown`] after shutdown.
    pub async fn remove(&self, session_id: &str, page_id: PageId) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = PageKey::new(session_id, page_id);

        {
            let mut state = self.shared.state.lock();
            state.pending.remove(&key);
            state.queue.mark_removed(&key);
        }

        let _in_flight = self.shared.lifecycle.in_flight_guard();
        self.shared
            .backend
            .remove(&key)
            .await
            .map_err(|source| StoreError::Remove { key, source })
    }

    /// Removes every page of `session_id`, pending or not.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Evict`] if the underlying bulk removal fails and
    /// [`StoreError::ShutDown`] after shutdown.
    pub async fn evict_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;

        {
            let mut state = self.shared.state.lock();
            let dropped = state.pending.remove_session(session_id).len();
            let flushing = state.queue.mark_session_removed(session_id);
            debug!(session_id, dropped, flushing, "evicted pending pages");
        }

        let _in_flight = self.shared.lifecycle.in_flight_guard();
        self.shared
            .backend
            .evict_session(session_id)
            .await
            .map_err(|source| StoreError::Evict {
                session_id: session_id.to_string(),
                source,
            })
    }

    /// Persists every pending page, stops the workers and closes the
    /// underlying store.
    ///
    /// Writes issued while shutdown runs are persisted synchronously. The
    /// workers are joined and the backend closed on every path, including
    /// when pages fail to persist. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Drain`] listing pages that could not be
    /// persisted, or [`StoreError::Close`] if closing the backend failed.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        if !self.shared.lifecycle.trigger_shutdown() {
            return Ok(());
        }
        self.shared.state.lock().queue.close();
        info!("shutting down async page store");

        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            let panicked = workers.join().await;
            if panicked > 0 {
                warn!(panicked, "flush workers panicked; their pages are left to the drain");
            }
        }

        let failures = self.drain_pending().await;

        if !self.shared.lifecycle.wait_for_drain(self.drain_timeout).await {
            warn!(
                in_flight = self.shared.lifecycle.in_flight_count(),
                "closing underlying store with operations still in flight"
            );
        }
        let closed = self.shared.backend.close().await;
        self.shared.lifecycle.mark_stopped();
        info!("async page store stopped");

        if failures.is_empty() {
            return closed.map_err(StoreError::Close);
        }
        if let Err(err) = closed {
            warn!(error = %err, "failed to close underlying store");
        }
        Err(StoreError::Drain { failures })
    }

    /// Persists all pending pages on the calling task. Workers must be stopped.
    ///
    /// A key with a synchronous write in flight is drained after that write,
    /// so the newest page is the last one persisted.
    async fn drain_pending(&self) -> Vec<DrainFailure> {
        let keys = {
            let mut state = self.shared.state.lock();
            let released = state.queue.release_idle();
            record_occupancy(&state);
            debug!(released, "released idle flush slots");
            state.pending.keys()
        };

        let mut failures = Vec::new();
        let mut persisted = 0_usize;
        for key in keys {
            let snapshot = loop {
                let released = self.shared.released.notified();
                tokio::pin!(released);
                released.as_mut().enable();

                {
                    let mut state = self.shared.state.lock();
                    if !state.queue.is_blocking(&key) {
                        let snapshot = state.pending.snapshot(&key);
                        if snapshot.is_some() {
                            let registered = state.queue.begin_blocking(&key);
                            debug_assert!(registered, "{key} holds a slot after workers stopped");
                        }
                        break snapshot;
                    }
                }
                debug!(key = %key, "waiting for synchronous write before draining");
                released.await;
            };
            let Some(snapshot) = snapshot else {
                continue;
            };
            let _registration = BlockingWrite {
                shared: &self.shared,
                key: key.clone(),
            };

            match self.shared.backend.persist(&key, snapshot.page).await {
                Ok(()) => {
                    self.shared
                        .state
                        .lock()
                        .pending
                        .remove_if_unchanged(&key, snapshot.generation);
                    persisted += 1;
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "failed to persist pending page during shutdown");
                    failures.push(DrainFailure { key, error });
                }
            }
        }

        info!(persisted, failed = failures.len(), "drained pending pages");
        failures
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let state = self.shared.state.lock();
        StoreStats {
            pending: state.pending.len(),
            queued: state.queue.queued(),
            occupied: state.queue.occupied(),
            blocking: state.queue.blocking(),
            capacity: state.queue.capacity(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StoreState {
        self.shared.lifecycle.state()
    }
}

impl<P> Drop for AsyncPageStore<P>
where
    P: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(workers) = self.workers.get_mut().take() else {
            return;
        };
        self.shared.lifecycle.trigger_shutdown();
        workers.abort();

        let pending = self.shared.state.lock().pending.len();
        if pending > 0 {
            warn!(
                pending,
                "async page store dropped without shutdown; pending pages were not persisted"
            );
        }
    }
}

/// The decorator is itself a page store, so it can be stacked or handed to
/// code that only knows the trait.
#[async_trait]
impl<P> PageStore<P> for AsyncPageStore<P>
where
    P: Send + Sync + 'static,
{
    async fn persist(&self, key: &PageKey, page: Arc<P>) -> anyhow::Result<()> {
        Ok(self.store(&key.session_id, key.page_id, page).await?)
    }

    async fn read(&self, key: &PageKey) -> anyhow::Result<Option<Arc<P>>> {
        Ok(self.retrieve(&key.session_id, key.page_id).await?)
    }

    async fn remove(&self, key: &PageKey) -> anyhow::Result<()> {
        Ok(AsyncPageStore::remove(self, &key.session_id, key.page_id).await?)
    }

    async fn evict_session(&self, session_id: &str) -> anyhow::Result<()> {
        Ok(AsyncPageStore::evict_session(self, session_id).await?)
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(self.shutdown().await?)
    }
}
