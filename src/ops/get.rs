//! Get operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key, validate_key};
use crate::codec::{Message, decode_counter};
use crate::context::Context;
use crate::entry::{CounterEntry, MessageEntry, RawEntry};
use crate::error::{Error, Result};
use crate::store::DataStore;

/// Reads one key.
///
/// Absent keys yield `None` (or `0` for counters) unless [`required`] is
/// set, in which case they fail with [`Error::NotFound`].
///
/// [`required`]: GetOperation::required
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct GetOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    key: Vec<u8>,
    required: bool,
}

impl<'a, S: DataStore + ?Sized> GetOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            key: Vec::new(),
            required: false,
        }
    }

    /// Report absence as [`Error::NotFound`].
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Key from a string or `format_args!`.
    pub fn by_key(mut self, key: impl Display) -> Self {
        self.key = format_key(key);
        self
    }

    /// Key from raw bytes.
    pub fn by_raw_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    async fn fetch(self) -> Result<Option<RawEntry>> {
        validate_key(&self.key, self.store.config())?;
        debug!(
            store = self.store.name(),
            key = %display_key(&self.key),
            required = self.required,
            "get"
        );
        self.store
            .get_raw(self.ctx, &self.key, self.required)
            .await
    }

    /// The stored bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a required absent key, or the engine's error.
    pub async fn to_binary(self) -> Result<Option<Vec<u8>>> {
        Ok(self.fetch().await?.map(|entry| entry.value))
    }

    /// The stored bytes as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the value is not UTF-8.
    pub async fn to_string(self) -> Result<Option<String>> {
        self.to_binary()
            .await?
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| Error::invalid_request(format!("value is not UTF-8: {e}")))
            })
            .transpose()
    }

    /// The stored counter; absent or undersized values read as `0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a required absent key, or the engine's error.
    pub async fn to_counter(self) -> Result<u64> {
        let value = self.to_binary().await?;
        Ok(value.as_deref().and_then(decode_counter).unwrap_or(0))
    }

    /// The stored value decoded as a message.
    ///
    /// # Errors
    ///
    /// Returns the message's decode error, or the engine's error.
    pub async fn to_message<T: Message>(self) -> Result<Option<T>> {
        self.to_binary()
            .await?
            .map(|bytes| T::unmarshal(&bytes))
            .transpose()
    }

    /// The full entry with TTL and version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a required absent key, or the engine's error.
    pub async fn to_entry(self) -> Result<Option<RawEntry>> {
        self.fetch().await
    }

    /// The full entry with the value decoded as a message.
    ///
    /// # Errors
    ///
    /// Returns the message's decode error, or the engine's error.
    pub async fn to_message_entry<T: Message>(self) -> Result<Option<MessageEntry<T>>> {
        self.fetch()
            .await?
            .map(RawEntry::into_message::<T>)
            .transpose()
    }

    /// The full entry with the value decoded as a counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a required absent key, or the engine's error.
    pub async fn to_counter_entry(self) -> Result<Option<CounterEntry>> {
        Ok(self.fetch().await?.map(RawEntry::into_counter))
    }

    /// Whether the key is present and unexpired.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn exists(mut self) -> Result<bool> {
        self.required = false;
        Ok(self.fetch().await?.is_some())
    }
}
