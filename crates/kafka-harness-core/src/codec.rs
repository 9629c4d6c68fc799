//! Key and value codecs.
//!
//! Clients move raw bytes; a [`Codec`] turns them into typed keys and values
//! on the way in and out. Keys and values are encoded independently.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, ClientResult};

/// Encodes and decodes one side (key or value) of a record.
pub trait Codec: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Encode an item to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] if the item cannot be represented.
    fn encode(&self, item: &Self::Item) -> ClientResult<Bytes>;

    /// Decode an item from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Codec`] if the bytes are not a valid item.
    fn decode(&self, bytes: &[u8]) -> ClientResult<Self::Item>;
}

/// UTF-8 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    type Item = String;

    fn encode(&self, item: &String) -> ClientResult<Bytes> {
        Ok(Bytes::copy_from_slice(item.as_bytes()))
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ClientError::Codec(e.to_string()))
    }
}

/// Bytes passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Bytes;

    fn encode(&self, item: &Bytes) -> ClientResult<Bytes> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// JSON documents via serde.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    #[must_use]
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

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> ClientResult<Bytes> {
        serde_json::to_vec(item)
            .map(Bytes::from)
            .map_err(|e| ClientError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> ClientResult<T> {
        serde_json::from_slice(bytes).map_err(|e| ClientError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        item: String,
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        let result = TextCodec.decode(&[0xc3, 0x28]);
        assert!(matches!(result, Err(ClientError::Codec(_))));
    }

    #[test]
    fn test_json_decodes_struct() {
        let codec = JsonCodec::<Order>::new();
        let order = codec.decode(br#"{"id":7,"item":"widget"}"#).unwrap();
        assert_eq!(
            order,
            Order {
                id: 7,
                item: "widget".to_string()
            }
        );
    }

    #[test]
    fn test_json_rejects_wrong_shape() {
        let codec = JsonCodec::<Order>::new();
        assert!(codec.decode(br#"{"id":"seven"}"#).is_err());
    }
}
