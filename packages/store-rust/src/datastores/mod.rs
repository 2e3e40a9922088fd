//! `PageStore` implementations.
//!
//! Concrete backends for the [`PageStore`](pagestore_core::PageStore) trait,
//! usable directly or underneath [`AsyncPageStore`](crate::store::AsyncPageStore):
//! - [`NullPageStore`] for tests and ephemeral pages
//! - [`MemoryPageStore`] keeping encoded pages in a `DashMap`
//! - [`RedbPageStore`] persisting encoded pages to a single redb file
//! - [`LatencyPageStore`] adding artificial latency on top of any of them

mod latency;
mod memory;
mod null;
#[cfg(feature = "redb")]
mod redb;

pub use latency::LatencyPageStore;
pub use memory::MemoryPageStore;
pub use null::NullPageStore;
#[cfg(feature = "redb")]
pub use self::redb::RedbPageStore;
