//! `pagestore` core: page keys, the underlying page store trait, and page codecs.

pub mod codec;
pub mod traits;
pub mod types;

pub use codec::{JsonCodec, MsgPackCodec, PageCodec};
pub use traits::PageStore;
pub use types::{ManageablePage, PageId, PageKey};
