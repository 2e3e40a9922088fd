use std::sync::Arc;

use async_trait::async_trait;

use crate::types::PageKey;

/// Pluggable persistence backend for pages.
///
/// Every call may be slow: implementations are free to serialize, hit the
/// disk or the network before returning. Callers that cannot afford that
/// latency wrap the backend in a write-behind decorator.
/// Implementations: null, in-memory, redb, latency-injecting wrapper, and the
/// asynchronous decorator itself.
///
/// Used as `Arc<dyn PageStore<P>>`. Implementations must tolerate concurrent
/// calls for different keys.
#[async_trait]
pub trait PageStore<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    /// Persist a page under `key`, replacing any previous page.
    async fn persist(&self, key: &PageKey, page: Arc<P>) -> anyhow::Result<()>;

    /// Read the page stored under `key`.
    ///
    /// Returns `None` if nothing is stored for the key.
    async fn read(&self, key: &PageKey) -> anyhow::Result<Option<Arc<P>>>;

    /// Remove the page stored under `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &PageKey) -> anyhow::Result<()>;

    /// Remove every page owned by `session_id`.
    async fn evict_session(&self, session_id: &str) -> anyhow::Result<()>;

    /// Release resources held by the store.
    async fn close(&self) -> anyhow::Result<()>;
}
