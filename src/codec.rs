//! Value encodings layered on top of raw bytes.
//!
//! The storage layer itself is encoding-agnostic. Operation builders use the
//! helpers here to turn typed payloads into bytes and back:
//!
//! - counters as 8-byte big-endian unsigned integers,
//! - structured messages through the [`Message`] trait.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::COUNTER_SIZE;
use crate::error::{Error, Result};

/// Encode a counter as 8 big-endian bytes.
#[must_use]
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decode the leading 8 bytes of `bytes` as a big-endian counter.
///
/// Returns `None` when fewer than 8 bytes are present.
#[must_use]
pub fn decode_counter(bytes: &[u8]) -> Option<u64> {
    let head: [u8; COUNTER_SIZE] = bytes.get(..COUNTER_SIZE)?.try_into().ok()?;
    Some(u64::from_be_bytes(head))
}

/// Structured message serialization.
///
/// Implement this for message types with their own wire format (protobuf,
/// bincode, ...). [`Json`] covers any serde type.
pub trait Message: Sized {
    /// Encode the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the message cannot be encoded.
    fn marshal(&self) -> Result<Vec<u8>>;

    /// Decode a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if `bytes` is not a valid encoding.
    fn unmarshal(bytes: &[u8]) -> Result<Self>;
}

/// JSON-encoded message wrapper for serde types.
///
/// ```ignore
/// store.set(&ctx).by_key("profile:1").message(&Json(profile)).await?;
/// let Json(profile) = store.get(&ctx).by_key("profile:1").to_message::<Json<Profile>>().await?.unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize + DeserializeOwned> Message for Json<T> {
    fn marshal(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(Error::codec)
    }

    fn unmarshal(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map(Json).map_err(Error::codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn test_counter_is_big_endian() {
        assert_eq!(encode_counter(1), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(encode_counter(0x0102), vec![0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_decode_counter_short_value() {
        assert_eq!(decode_counter(&[]), None);
        assert_eq!(decode_counter(&[1, 2, 3]), None);
    }

    #[test]
    fn test_decode_counter_uses_leading_bytes() {
        let mut bytes = encode_counter(u64::MAX);
        bytes.extend_from_slice(b"trailing");
        assert_eq!(decode_counter(&bytes), Some(u64::MAX));
    }

    #[test]
    fn test_json_message() {
        let profile = Json(Profile {
            name: "alice".into(),
            age: 30,
        });
        let bytes = profile.marshal().unwrap();
        let decoded = Json::<Profile>::unmarshal(&bytes).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn test_json_decode_failure_is_codec_error() {
        let err = Json::<Profile>::unmarshal(b"not json").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
