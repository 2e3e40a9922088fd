//! Store lifecycle controller with in-flight operation tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, a `watch` channel to
//! signal the flush workers, and an atomic counter with RAII guards so
//! shutdown can wait for callers still talking to the underlying store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Lifecycle state of an asynchronous store.
///
/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Accepting writes on the asynchronous path.
    Running,
    /// Shutdown started: workers are stopping and pending pages are being
    /// persisted. New writes go through the synchronous path.
    Draining,
    /// Underlying store closed. Every operation is rejected.
    Stopped,
}

/// Coordinates shutdown between the store façade and its flush workers.
///
/// 1. Workers select on `shutdown_receiver()` alongside their queue wait
/// 2. Façade operations hold an `in_flight_guard()` while they touch the backend
/// 3. `trigger_shutdown()` moves to `Draining` and signals all workers
/// 4. `wait_for_drain()` waits for in-flight operations before the backend closes
#[derive(Debug)]
pub struct LifecycleController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<StoreState>,
}

impl LifecycleController {
    /// Creates a controller in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(StoreState::Running),
        }
    }

    /// Returns a receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and signals every shutdown receiver.
    ///
    /// Returns `false` if shutdown had already been triggered, so exactly one
    /// caller performs the teardown.
    pub fn trigger_shutdown(&self) -> bool {
        let previous = self.state.rcu(|state| match **state {
            StoreState::Running => Arc::new(StoreState::Draining),
            _ => Arc::clone(state),
        });
        if *previous != StoreState::Running {
            return false;
        }
        // Stored even with no live receiver, so a late subscriber still sees it.
        self.shutdown_signal.send_replace(true);
        true
    }

    /// Moves to `Stopped`.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(StoreState::Stopped));
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> StoreState {
        **self.state.load()
    }

    /// Creates an RAII guard that tracks an in-flight operation.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Returns the number of operations currently holding a guard.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits for all in-flight operations to finish, up to `timeout`.
    ///
    /// Returns `false` if the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
