//! Write-behind store: façade, pending table, bounded queue and flush workers.

mod async_store;
pub mod pending;
pub mod queue;
mod worker;

pub use async_store::{AsyncPageStore, StoreStats};
pub use pending::{Generation, PendingSnapshot, PendingTable};
pub use queue::{Admission, TaskQueue};
