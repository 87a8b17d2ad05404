//! Remove operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key, validate_key};
use crate::context::Context;
use crate::error::Result;
use crate::store::DataStore;

/// Deletes one key. Idempotent.
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct RemoveOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    key: Vec<u8>,
}

impl<'a, S: DataStore + ?Sized> RemoveOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            key: Vec::new(),
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

    /// Delete the key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EmptyKey`] without a key, or the engine's error.
    pub async fn run(self) -> Result<()> {
        validate_key(&self.key, self.store.config())?;
        debug!(store = self.store.name(), key = %display_key(&self.key), "remove");
        self.store.remove_raw(self.ctx, &self.key).await
    }
}
