//! Touch operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key, validate_key};
use crate::constants::NO_TTL;
use crate::context::Context;
use crate::error::Result;
use crate::store::DataStore;

/// Resets an entry's TTL without changing its value or version.
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct TouchOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    key: Vec<u8>,
    ttl: u64,
}

impl<'a, S: DataStore + ?Sized> TouchOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            key: Vec::new(),
            ttl: NO_TTL,
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

    /// New TTL in seconds; `0` makes the entry eternal.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Apply the new TTL.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the key is absent.
    pub async fn run(self) -> Result<()> {
        validate_key(&self.key, self.store.config())?;
        debug!(
            store = self.store.name(),
            key = %display_key(&self.key),
            ttl = self.ttl,
            "touch"
        );
        self.store.touch_raw(self.ctx, &self.key, self.ttl).await
    }
}
