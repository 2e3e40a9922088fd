//! In-memory [`PageStore`] implementation backed by [`DashMap`].
//!
//! Pages are kept *encoded*, so every read decodes a fresh value: a page read
//! back from this store is equal to, but never the same object as, the page
//! that was persisted. That makes it a faithful stand-in for a serializing
//! backend in tests.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use pagestore_core::{MsgPackCodec, PageCodec, PageKey, PageStore};

/// In-memory page store keyed by [`PageKey`].
///
/// `DashMap` shards internally, so concurrent calls for different keys do not
/// contend on a single lock. `close` keeps the contents.
pub struct MemoryPageStore<P> {
    entries: DashMap<PageKey, Vec<u8>>,
    codec: Arc<dyn PageCodec<P>>,
}

impl<P> MemoryPageStore<P> {
    /// Creates an empty store that encodes pages with `codec`.
    #[must_use]
    pub fn new(codec: Arc<dyn PageCodec<P>>) -> Self {
        Self {
            entries: DashMap::new(),
            codec,
        }
    }

    /// Number of stored pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &PageKey) -> bool {
        self.entries.contains_key(key)
    }
}

impl<P> MemoryPageStore<P>
where
    P: Serialize + DeserializeOwned + 'static,
{
    /// Creates an empty store using [`MsgPackCodec`].
    #[must_use]
    pub fn msgpack() -> Self {
        Self::new(Arc::new(MsgPackCodec))
    }
}

#[async_trait]
impl<P> PageStore<P> for MemoryPageStore<P>
where
    P: Send + Sync + 'static,
{
    async fn persist(&self, key: &PageKey, page: Arc<P>) -> anyhow::Result<()> {
        let bytes = self.codec.encode(&page)?;
        self.entries.insert(key.clone(), bytes);
        Ok(())
    }

    async fn read(&self, key: &PageKey) -> anyhow::Result<Option<Arc<P>>> {
        // Copy the bytes out so no shard lock is held while decoding.
        let Some(bytes) = self.entries.get(key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        Ok(Some(Arc::new(self.codec.decode(&bytes)?)))
    }

    async fn remove(&self, key: &PageKey) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn evict_session(&self, session_id: &str) -> anyhow::Result<()> {
        self.entries.retain(|key, _| !key.is_owned_by(session_id));
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use pagestore_core::JsonCodec;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        revision: u32,
    }

    fn note(revision: u32) -> Arc<Note> {
        Arc::new(Note {
            title: "draft".to_string(),
            revision,
        })
    }

    #[tokio::test]
    async fn read_returns_equal_but_distinct_page() {
        let store = MemoryPageStore::msgpack();
        let key = PageKey::new("s", 1);
        let stored = note(1);
        store.persist(&key, Arc::clone(&stored)).await.unwrap();

        let read = store.read(&key).await.unwrap().unwrap();
        assert_eq!(*read, *stored);
        assert!(!Arc::ptr_eq(&read, &stored));
    }

    #[tokio::test]
    async fn persist_replaces_previous_page() {
        let store = MemoryPageStore::new(Arc::new(JsonCodec));
        let key = PageKey::new("s", 1);
        store.persist(&key, note(1)).await.unwrap();
        store.persist(&key, note(2)).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.read(&key).await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn read_missing_returns_none() {
        let store = MemoryPageStore::<Note>::msgpack();
        assert!(store.read(&PageKey::new("s", 9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryPageStore::msgpack();
        let key = PageKey::new("s", 1);
        store.persist(&key, note(1)).await.unwrap();

        PageStore::<Note>::remove(&store, &key).await.unwrap();
        PageStore::<Note>::remove(&store, &key).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn evict_session_only_removes_that_session() {
        let store = MemoryPageStore::msgpack();
        store.persist(&PageKey::new("a", 1), note(1)).await.unwrap();
        store.persist(&PageKey::new("a", 2), note(2)).await.unwrap();
        store.persist(&PageKey::new("ab", 1), note(3)).await.unwrap();

        PageStore::<Note>::evict_session(&store, "a").await.unwrap();

        assert!(!store.contains(&PageKey::new("a", 1)));
        assert!(!store.contains(&PageKey::new("a", 2)));
        assert!(store.contains(&PageKey::new("ab", 1)));
    }

    #[tokio::test]
    async fn undecodable_bytes_surface_as_error() {
        let store = MemoryPageStore::<Note>::msgpack();
        let key = PageKey::new("s", 1);
        store.entries.insert(key.clone(), vec![0xc1]);

        assert!(store.read(&key).await.is_err());
    }
}
