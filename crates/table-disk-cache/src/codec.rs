//! Payload serialization collaborator
//!
//! The engine never interprets payload bytes itself; a [`PayloadCodec`]
//! supplied at construction converts values to bytes and back. Codec
//! failures surface as typed errors, never as cache misses.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Converts in-memory values to byte payloads and back
pub trait PayloadCodec {
    /// The value type stored in the cache
    type Value;

    /// Encode a value into payload bytes
    fn encode(&self, value: &Self::Value) -> std::result::Result<Vec<u8>, CodecError>;

    /// Decode payload bytes back into a value
    fn decode(&self, bytes: &[u8]) -> std::result::Result<Self::Value, CodecError>;
}

/// JSON codec for any serde-compatible value
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> PayloadCodec for JsonCodec<T> {
    type Value = T;

    fn encode(&self, value: &T) -> std::result::Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
