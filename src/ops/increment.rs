//! Increment operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key, validate_key};
use crate::constants::NO_TTL;
use crate::context::Context;
use crate::error::Result;
use crate::store::DataStore;

/// Atomic counter increment, the equivalent of `i++`.
///
/// [`run`] returns the value before the increment. On an absent key the
/// counter is seeded with the initial value, which is then reported as the
/// previous value: `initial` comes back and `initial + delta` is stored.
/// Unset initial value and delta default to `0` and `1` at dispatch.
///
/// [`run`]: IncrementOperation::run
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct IncrementOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    key: Vec<u8>,
    ttl: u64,
    initial: Option<i64>,
    delta: Option<i64>,
}

impl<'a, S: DataStore + ?Sized> IncrementOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            key: Vec::new(),
            ttl: NO_TTL,
            initial: None,
            delta: None,
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

    /// Expire after `ttl` seconds; `0` keeps the current expiry.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Seed value for an absent counter.
    pub fn with_initial_value(mut self, initial: i64) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Amount to add; may be negative.
    pub fn with_delta(mut self, delta: i64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Apply the increment and return the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::EmptyKey`] without a key, or the engine's error.
    pub async fn run(self) -> Result<i64> {
        validate_key(&self.key, self.store.config())?;
        let initial = self.initial.unwrap_or(0);
        let delta = self.delta.unwrap_or(1);
        debug!(
            store = self.store.name(),
            key = %display_key(&self.key),
            initial,
            delta,
            "increment"
        );
        self.store
            .increment_raw(self.ctx, &self.key, initial, delta, self.ttl)
            .await
    }
}
