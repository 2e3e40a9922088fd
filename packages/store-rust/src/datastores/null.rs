//! No-op [`PageStore`] implementation.
//!
//! [`NullPageStore`] discards all writes and returns empty results for reads.
//! Useful for tests, benchmarks, and pages that never need to survive a restart.

use std::sync::Arc;

use async_trait::async_trait;

use pagestore_core::{PageKey, PageStore};

/// No-op `PageStore` for testing and ephemeral pages.
///
/// All write operations succeed immediately without side effects.
/// All reads return `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPageStore;

#[async_trait]
impl<P> PageStore<P> for NullPageStore
where
    P: Send + Sync + 'static,
{
    async fn persist(&self, _key: &PageKey, _page: Arc<P>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read(&self, _key: &PageKey) -> anyhow::Result<Option<Arc<P>>> {
        Ok(None)
    }

    async fn remove(&self, _key: &PageKey) -> anyhow::Result<()> {
        Ok(())
    }

    async fn evict_session(&self, _session_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PageKey {
        PageKey::new("session", 1)
    }

    #[tokio::test]
    async fn persist_returns_ok() {
        let store = NullPageStore;
        assert!(store.persist(&key(), Arc::new(42_u32)).await.is_ok());
    }

    #[tokio::test]
    async fn read_returns_none_after_persist() {
        let store = NullPageStore;
        store.persist(&key(), Arc::new(42_u32)).await.unwrap();
        let result: Option<Arc<u32>> = store.read(&key()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn remove_and_evict_return_ok() {
        let store = NullPageStore;
        assert!(PageStore::<u32>::remove(&store, &key()).await.is_ok());
        assert!(PageStore::<u32>::evict_session(&store, "session").await.is_ok());
    }

    #[tokio::test]
    async fn close_returns_ok() {
        let store = NullPageStore;
        assert!(PageStore::<u32>::close(&store).await.is_ok());
    }
}
