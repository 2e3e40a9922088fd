//! [`PageStore`] decorator that makes every call slow.
//!
//! Models a backend whose serialization or I/O dominates request time. Used
//! by the demo binary and by tests that need a measurably slow store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use pagestore_core::{PageKey, PageStore};

/// Adds fixed latency, optionally with random jitter, to `persist` and `read`.
///
/// `remove`, `evict_session` and `close` pass straight through.
pub struct LatencyPageStore<P> {
    inner: Arc<dyn PageStore<P>>,
    persist_latency: Duration,
    read_latency: Duration,
    /// Fraction of the latency by which a single call may deviate, in `[0, 1]`.
    jitter: f64,
}

impl<P> LatencyPageStore<P>
where
    P: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(inner: Arc<dyn PageStore<P>>, persist_latency: Duration, read_latency: Duration) -> Self {
        Self {
            inner,
            persist_latency,
            read_latency,
            jitter: 0.0,
        }
    }

    /// Lets each call's latency vary uniformly within `±jitter` of its target.
    /// Values outside `[0, 1]` are clamped.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn delay(&self, target: Duration) -> Duration {
        if self.jitter <= 0.0 || target.is_zero() {
            return target;
        }
        let low = target.mul_f64(1.0 - self.jitter);
        let high = target.mul_f64(1.0 + self.jitter);
        rand::rng().random_range(low..=high)
    }
}

#[async_trait]
impl<P> PageStore<P> for LatencyPageStore<P>
where
    P: Send + Sync + 'static,
{
    async fn persist(&self, key: &PageKey, page: Arc<P>) -> anyhow::Result<()> {
        let delay = self.delay(self.persist_latency);
        tokio::time::sleep(delay).await;
        self.inner.persist(key, page).await
    }

    async fn read(&self, key: &PageKey) -> anyhow::Result<Option<Arc<P>>> {
        let delay = self.delay(self.read_latency);
        tokio::time::sleep(delay).await;
        self.inner.read(key).await
    }

    async fn remove(&self, key: &PageKey) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }

    async fn evict_session(&self, session_id: &str) -> anyhow::Result<()> {
        self.inner.evict_session(session_id).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastores::MemoryPageStore;

    fn slow_store(jitter: f64) -> LatencyPageStore<u32> {
        let inner: Arc<dyn PageStore<u32>> = Arc::new(MemoryPageStore::msgpack());
        LatencyPageStore::new(inner, Duration::from_millis(200), Duration::from_millis(100))
            .with_jitter(jitter)
    }

    #[tokio::test(start_paused = true)]
    async fn persist_and_read_take_configured_latency() {
        let store = slow_store(0.0);
        let key = PageKey::new("s", 1);

        let started = tokio::time::Instant::now();
        store.persist(&key, Arc::new(7)).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        assert_eq!(*store.read(&key).await.unwrap().unwrap(), 7);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_is_immediate() {
        let store = slow_store(0.0);
        let started = tokio::time::Instant::now();
        store.remove(&PageKey::new("s", 1)).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let store = slow_store(0.1);
        for _ in 0..100 {
            let delay = store.delay(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(900), "{delay:?}");
            assert!(delay <= Duration::from_millis(1100), "{delay:?}");
        }
    }

    #[test]
    fn jitter_is_clamped() {
        assert!((slow_store(5.0).jitter - 1.0).abs() < f64::EPSILON);
        assert!(slow_store(-1.0).jitter.abs() < f64::EPSILON);
    }
}
