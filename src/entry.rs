//! Read-result shapes.
//!
//! All three share `(key, value, ttl, version)` and differ only in how the
//! value is typed. `ttl` is the remaining lifetime in whole seconds (rounded
//! up), `0` for eternal entries.

use crate::codec::{Message, decode_counter};
use crate::error::Result;

/// Entry with a raw byte value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ttl: u64,
    pub version: i64,
}

/// Entry with a decoded structured message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntry<T> {
    pub key: Vec<u8>,
    pub value: T,
    pub ttl: u64,
    pub version: i64,
}

/// Entry with a decoded counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterEntry {
    pub key: Vec<u8>,
    pub value: u64,
    pub ttl: u64,
    pub version: i64,
}

impl RawEntry {
    /// Key as UTF-8, lossily.
    #[must_use]
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Decode the value as a message.
    ///
    /// # Errors
    ///
    /// Returns the message's decode error.
    pub fn into_message<T: Message>(self) -> Result<MessageEntry<T>> {
        let value = T::unmarshal(&self.value)?;
        Ok(MessageEntry {
            key: self.key,
            value,
            ttl: self.ttl,
            version: self.version,
        })
    }

    /// Decode the value as a counter; undersized values read as `0`.
    #[must_use]
    pub fn into_counter(self) -> CounterEntry {
        CounterEntry {
            value: decode_counter(&self.value).unwrap_or(0),
            key: self.key,
            ttl: self.ttl,
            version: self.version,
        }
    }
}
