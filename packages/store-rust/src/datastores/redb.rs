//! Durable [`PageStore`] backed by a single redb file.
//!
//! Pages are encoded with a [`PageCodec`] and stored in one table keyed by
//! `(session_id, page_id)`, so a session's pages are contiguous and
//! `evict_session` is a range scan. redb is synchronous: every transaction
//! runs on the blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use pagestore_core::{PageCodec, PageKey, PageStore};

const PAGES: TableDefinition<(&str, u32), &[u8]> = TableDefinition::new("pages");

/// redb-backed page store. Cheap to share: the database handle is reference counted.
pub struct RedbPageStore<P> {
    db: Arc<Database>,
    codec: Arc<dyn PageCodec<P>>,
}

impl<P> RedbPageStore<P> {
    /// Opens (or creates) the database at `path` and makes sure the page
    /// table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the table cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>, codec: Arc<dyn PageCodec<P>>) -> anyhow::Result<Self> {
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        txn.open_table(PAGES)?;
        txn.commit()?;
        debug!(path = %path.as_ref().display(), "opened redb page store");
        Ok(Self {
            db: Arc::new(db),
            codec,
        })
    }
}

#[async_trait]
impl<P> PageStore<P> for RedbPageStore<P>
where
    P: Send + Sync + 'static,
{
    async fn persist(&self, key: &PageKey, page: Arc<P>) -> anyhow::Result<()> {
        let bytes = self.codec.encode(&page)?;
        let db = Arc::clone(&self.db);
        let key = key.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(PAGES)?;
                table.insert((key.session_id.as_str(), key.page_id), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    async fn read(&self, key: &PageKey) -> anyhow::Result<Option<Arc<P>>> {
        let db = Arc::clone(&self.db);
        let key = key.clone();
        let bytes = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Vec<u8>>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(PAGES)?;
            let value = table.get((key.session_id.as_str(), key.page_id))?;
            Ok(value.map(|guard| guard.value().to_vec()))
        })
        .await??;

        match bytes {
            Some(bytes) => Ok(Some(Arc::new(self.codec.decode(&bytes)?))),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &PageKey) -> anyhow::Result<()> {
        let db = Arc::clone(&self.db);
        let key = key.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(PAGES)?;
                table.remove((key.session_id.as_str(), key.page_id))?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    async fn evict_session(&self, session_id: &str) -> anyhow::Result<()> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_string();
        let removed = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let txn = db.begin_write()?;
            let removed = {
                let mut table = txn.open_table(PAGES)?;
                let sid = session_id.as_str();
                let page_ids = table
                    .range((sid, 0)..=(sid, u32::MAX))?
                    .map(|entry| entry.map(|(key, _)| key.value().1))
                    .collect::<Result<Vec<u32>, _>>()?;
                for page_id in &page_ids {
                    table.remove((sid, *page_id))?;
                }
                page_ids.len()
            };
            txn.commit()?;
            Ok(removed)
        })
        .await??;
        debug!(removed, "evicted session pages from redb");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Every write commits durably; the file is released when the last handle drops.
        Ok(())
    }
}
