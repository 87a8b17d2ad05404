//! Compare-and-set operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key, validate_key};
use crate::codec::{Message, encode_counter};
use crate::constants::NO_TTL;
use crate::context::Context;
use crate::error::Result;
use crate::store::DataStore;

/// Conditional write gated on the stored version.
///
/// Terminals return `Ok(true)` when the write was applied and `Ok(false)`
/// when the stored version did not match; a mismatch is not an error.
/// Version `0` (the default) means "only if the key does not exist".
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct CompareAndSetOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    key: Vec<u8>,
    ttl: u64,
    version: i64,
}

impl<'a, S: DataStore + ?Sized> CompareAndSetOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            key: Vec::new(),
            ttl: NO_TTL,
            version: 0,
        }
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

    /// Expire after `ttl` seconds; `0` never expires.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Expected stored version.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Conditionally store raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EmptyKey`] without a key, or the engine's error.
    pub async fn binary(self, value: impl Into<Vec<u8>>) -> Result<bool> {
        self.dispatch(value.into()).await
    }

    /// Conditionally store a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EmptyKey`] without a key, or the engine's error.
    pub async fn string(self, value: impl Into<String>) -> Result<bool> {
        self.dispatch(value.into().into_bytes()).await
    }

    /// Conditionally store an 8-byte big-endian counter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EmptyKey`] without a key, or the engine's error.
    pub async fn counter(self, value: u64) -> Result<bool> {
        self.dispatch(encode_counter(value)).await
    }

    /// Conditionally store an encoded message.
    ///
    /// # Errors
    ///
    /// Returns the message's encode error, or the engine's error.
    pub async fn message<M: Message>(self, value: &M) -> Result<bool> {
        let bytes = value.marshal()?;
        self.dispatch(bytes).await
    }

    async fn dispatch(self, value: Vec<u8>) -> Result<bool> {
        validate_key(&self.key, self.store.config())?;
        let applied = self
            .store
            .compare_and_set_raw(self.ctx, &self.key, value, self.ttl, self.version)
            .await?;
        debug!(
            store = self.store.name(),
            key = %display_key(&self.key),
            version = self.version,
            applied,
            "compare_and_set"
        );
        Ok(applied)
    }
}
