//! Byte codecs for pages held by serializing stores.
//!
//! [`MsgPackCodec`] encodes with `rmp-serde` using named fields, so a page
//! written by one version of a struct can be read by a version that adds
//! optional fields. [`JsonCodec`] is human-readable and mainly useful when
//! inspecting a store by hand.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns pages into bytes and back.
///
/// Decoding always produces a fresh value, which is what makes a page read
/// back from a serializing store distinguishable from the one stored.
pub trait PageCodec<P>: Send + Sync {
    /// Encode a page.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be serialized.
    fn encode(&self, page: &P) -> anyhow::Result<Vec<u8>>;

    /// Decode a page previously produced by [`encode`](PageCodec::encode).
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `P`.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<P>;
}

/// `MsgPack` codec (named fields).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl<P> PageCodec<P> for MsgPackCodec
where
    P: Serialize + DeserializeOwned,
{
    fn encode(&self, page: &P) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(page)?)
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<P> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<P> PageCodec<P> for JsonCodec
where
    P: Serialize + DeserializeOwned,
{
    fn encode(&self, page: &P) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(page)?)
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<P> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
