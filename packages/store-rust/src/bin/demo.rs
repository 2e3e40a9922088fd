//! pagestore-demo: shows the write-behind decorator in front of a slow store.
//!
//! Stores one page per `(session, page)` pair and reads it straight back,
//! timing both calls. Within capacity both return immediately and the read
//! hands back the very page that was stored; beyond capacity writes block on
//! the slow store and reads come back as fresh copies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pagestore::config::AsyncStoreConfig;
use pagestore::datastores::{LatencyPageStore, MemoryPageStore};
use pagestore::store::AsyncPageStore;
use pagestore_core::{JsonCodec, ManageablePage, MsgPackCodec, PageCodec, PageId, PageStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Encoded pages in process memory
    Memory,
    /// Encoded pages in a redb file
    Redb,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Codec {
    MsgPack,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "pagestore-demo")]
#[command(about = "Store and read back pages through a bounded write-behind store")]
struct Cli {
    /// Number of sessions
    #[arg(long, default_value_t = 2)]
    sessions: u32,

    /// Pages stored per session
    #[arg(long, default_value_t = 5)]
    pages: u32,

    /// Latency of a single persist, in milliseconds
    #[arg(long, default_value_t = 2000)]
    write_ms: u64,

    /// Latency of a single read, in milliseconds
    #[arg(long, default_value_t = 1500)]
    read_ms: u64,

    /// Random deviation of each latency, as a fraction of it
    #[arg(long, default_value_t = 0.1)]
    jitter: f64,

    /// Distinct pages allowed to wait for a flush
    #[arg(long, env = "PAGESTORE_CAPACITY", default_value_t = 10)]
    capacity: usize,

    /// Background flush workers
    #[arg(long, env = "PAGESTORE_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Store underneath the latency layer
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Database file for the redb backend
    #[arg(long, value_name = "PATH", default_value = "pagestore-demo.redb")]
    redb_path: PathBuf,

    /// Page encoding
    #[arg(long, value_enum, default_value = "msg-pack")]
    codec: Codec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DemoPage {
    id: PageId,
    session_id: String,
    payload: Vec<u8>,
}

impl ManageablePage for DemoPage {
    fn page_id(&self) -> PageId {
        self.id
    }
}

fn codec(choice: Codec) -> Arc<dyn PageCodec<DemoPage>> {
    match choice {
        Codec::MsgPack => Arc::new(MsgPackCodec),
        Codec::Json => Arc::new(JsonCodec),
    }
}

#[cfg(feature = "redb")]
fn redb_backend(cli: &Cli) -> anyhow::Result<Arc<dyn PageStore<DemoPage>>> {
    let store = pagestore::datastores::RedbPageStore::open(&cli.redb_path, codec(cli.codec))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redb"))]
fn redb_backend(_cli: &Cli) -> anyhow::Result<Arc<dyn PageStore<DemoPage>>> {
    anyhow::bail!("pagestore-demo was built without the `redb` feature")
}

fn backend(cli: &Cli) -> anyhow::Result<Arc<dyn PageStore<DemoPage>>> {
    let inner: Arc<dyn PageStore<DemoPage>> = match cli.backend {
        Backend::Memory => Arc::new(MemoryPageStore::new(codec(cli.codec))),
        Backend::Redb => redb_backend(cli)?,
    };
    let slow = LatencyPageStore::new(
        inner,
        Duration::from_millis(cli.write_ms),
        Duration::from_millis(cli.read_ms),
    )
    .with_jitter(cli.jitter);
    Ok(Arc::new(slow))
}

#[derive(Debug, Default)]
struct Summary {
    pages: usize,
    served_from_memory: usize,
    store_time: Duration,
    retrieve_time: Duration,
}

async fn run(store: &AsyncPageStore<DemoPage>, cli: &Cli) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();

    for page_id in 1..=cli.pages {
        for session in 1..=cli.sessions {
            let session_id = format!("session-{session}");
            let page = Arc::new(DemoPage {
                id: page_id,
                session_id: session_id.clone(),
                payload: vec![0; 64],
            });

            let started = Instant::now();
            store.store_page(&session_id, Arc::clone(&page)).await?;
            let store_time = started.elapsed();

            let started = Instant::now();
            let restored = store.retrieve(&session_id, page_id).await?;
            let retrieve_time = started.elapsed();

            let from_memory = restored.as_ref().is_some_and(|restored| Arc::ptr_eq(restored, &page));
            info!(
                session = %session_id,
                page = page_id,
                store_ms = store_time.as_millis(),
                retrieve_ms = retrieve_time.as_millis(),
                from_memory,
                "stored and retrieved page"
            );

            summary.pages += 1;
            summary.served_from_memory += usize::from(from_memory);
            summary.store_time += store_time;
            summary.retrieve_time += retrieve_time;
        }
    }

    Ok(summary)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pagestore=info".parse()?)
                .add_directive("pagestore_demo=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!(?cli, "starting pagestore demo");

    let config = AsyncStoreConfig {
        capacity: cli.capacity,
        worker_count: cli.workers,
        ..AsyncStoreConfig::default()
    };
    let store = AsyncPageStore::new(config, backend(&cli)?)?;

    let outcome = tokio::select! {
        result = run(&store, &cli) => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; shutting down");
            Ok(None)
        }
    };

    if let Some(summary) = finish(&store, outcome).await? {
        info!(
            pages = summary.pages,
            served_from_memory = summary.served_from_memory,
            total_store_ms = summary.store_time.as_millis(),
            total_retrieve_ms = summary.retrieve_time.as_millis(),
            "demo finished"
        );
    }
    Ok(())
}

/// Shuts the store down whatever the run's outcome. A run error takes
/// precedence over a shutdown error.
async fn finish<T>(store: &AsyncPageStore<DemoPage>, outcome: anyhow::Result<T>) -> anyhow::Result<T> {
    let started = Instant::now();
    let shutdown = store.shutdown().await;
    info!(drain_ms = started.elapsed().as_millis(), "store shut down");

    match outcome {
        Ok(value) => {
            shutdown?;
            Ok(value)
        }
        Err(err) => {
            if let Err(shutdown_err) = shutdown {
                warn!(error = %shutdown_err, "shutdown after failed run also failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use pagestore::StoreState;
    use pagestore_core::PageKey;

    use super::*;

    fn demo_page(id: PageId) -> Arc<DemoPage> {
        Arc::new(DemoPage {
            id,
            session_id: "s".to_string(),
            payload: vec![1, 2, 3],
        })
    }

    #[tokio::test]
    async fn failed_run_still_drains_pending_pages() {
        let inner = Arc::new(MemoryPageStore::new(codec(Codec::MsgPack)));
        let store = AsyncPageStore::new(
            AsyncStoreConfig::default(),
            Arc::clone(&inner) as Arc<dyn PageStore<DemoPage>>,
        )
        .unwrap();
        store.store_page("s", demo_page(1)).await.unwrap();

        let outcome: anyhow::Result<()> = Err(anyhow::anyhow!("run failed"));
        let err = finish(&store, outcome).await.unwrap_err();

        assert_eq!(err.to_string(), "run failed");
        assert_eq!(store.state(), StoreState::Stopped);
        assert!(inner.contains(&PageKey::new("s", 1)));
    }

    #[tokio::test]
    async fn successful_run_returns_its_value_after_shutdown() {
        let store = AsyncPageStore::new(
            AsyncStoreConfig::default(),
            Arc::new(MemoryPageStore::new(codec(Codec::Json))) as Arc<dyn PageStore<DemoPage>>,
        )
        .unwrap();

        let value = finish(&store, Ok(7)).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(store.state(), StoreState::Stopped);
    }
}
