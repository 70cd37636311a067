//! Pluggable payload encoding.
//!
//! The runtime never inspects a fact's payload bytes directly; every read
//! and write goes through a [`PayloadCodec`]. `BincodeCodec` is the
//! default (fast, compact, matches `factflow`'s binary-first convention);
//! `JsonCodec` trades size and speed for human-readable storage, useful
//! when debugging a fact log by hand.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CoreError, Result};

/// Encodes and decodes typed values to and from the bytes stored on a
/// [`crate::fact::Fact`] or a snapshot.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Serialize `value` to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if encoding fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize `bytes` back into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if decoding fails.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Whether this codec applies its own compression to the encoded
    /// bytes (relevant to [`crate::snapshot::Snapshot::compressed`]).
    fn includes_compression(&self) -> bool {
        false
    }
}

/// Default codec: `bincode`, matching the converter's binary-first
/// convention.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl PayloadCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Human-readable codec over `serde_json`, useful in development and for
/// inspecting stored payloads by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
