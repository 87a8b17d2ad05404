//! Enumerate operation.

use std::fmt::Display;
use tracing::debug;

use super::key::{display_key, format_key};
use crate::codec::Message;
use crate::context::Context;
use crate::entry::{CounterEntry, MessageEntry, RawEntry};
use crate::error::{Error, Result};
use crate::store::{DataStore, EnumerateRequest};

/// Prefix scan in key order.
///
/// The seek position defaults to the prefix, the batch size to the store's
/// configured default. Callbacks return `false` to stop early.
#[must_use = "operations do nothing until a terminal method is awaited"]
pub struct EnumerateOperation<'a, S: ?Sized> {
    store: &'a S,
    ctx: &'a Context,
    prefix: Vec<u8>,
    seek: Option<Vec<u8>>,
    batch_size: usize,
    only_keys: bool,
    reverse: bool,
}

impl<'a, S: DataStore + ?Sized> EnumerateOperation<'a, S> {
    pub(crate) fn new(store: &'a S, ctx: &'a Context) -> Self {
        Self {
            store,
            ctx,
            prefix: Vec::new(),
            seek: None,
            batch_size: 0,
            only_keys: false,
            reverse: false,
        }
    }

    /// Prefix from a string or `format_args!`.
    pub fn by_prefix(mut self, prefix: impl Display) -> Self {
        self.prefix = format_key(prefix);
        self
    }

    /// Prefix from raw bytes.
    pub fn by_raw_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Start position from a string or `format_args!`.
    pub fn seek(mut self, seek: impl Display) -> Self {
        self.seek = Some(format_key(seek));
        self
    }

    /// Start position from raw bytes.
    pub fn by_raw_seek(mut self, seek: impl Into<Vec<u8>>) -> Self {
        self.seek = Some(seek.into());
        self
    }

    /// Rows per page; `0` uses the store default.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Skip values.
    pub fn only_keys(mut self) -> Self {
        self.only_keys = true;
        self
    }

    /// Descending key order.
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn into_request(self) -> (&'a S, &'a Context, EnumerateRequest) {
        let batch_size = if self.batch_size == 0 {
            self.store.config().default_batch_size
        } else {
            self.batch_size
        };
        let seek = self.seek.unwrap_or_else(|| self.prefix.clone());
        debug!(
            store = self.store.name(),
            prefix = %display_key(&self.prefix),
            batch_size,
            only_keys = self.only_keys,
            reverse = self.reverse,
            "enumerate"
        );
        let request = EnumerateRequest {
            prefix: self.prefix,
            seek,
            batch_size,
            only_keys: self.only_keys,
            reverse: self.reverse,
        };
        (self.store, self.ctx, request)
    }

    /// Visit raw entries.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or a cancellation error.
    pub async fn run<F>(self, mut callback: F) -> Result<()>
    where
        F: FnMut(RawEntry) -> bool + Send,
    {
        let (store, ctx, request) = self.into_request();
        store.enumerate_raw(ctx, &request, &mut callback).await
    }

    /// Visit entries with values decoded as messages.
    ///
    /// A value that fails to decode stops the iteration; its error is
    /// returned once the engine call completes. An engine error takes
    /// precedence over a decode error.
    ///
    /// # Errors
    ///
    /// Returns the engine's error or the first decode error.
    pub async fn run_messages<T, F>(self, mut callback: F) -> Result<()>
    where
        T: Message,
        F: FnMut(MessageEntry<T>) -> bool + Send,
    {
        let (store, ctx, request) = self.into_request();
        let mut decode_error: Option<Error> = None;
        store
            .enumerate_raw(ctx, &request, &mut |raw: RawEntry| {
                match raw.into_message::<T>() {
                    Ok(entry) => callback(entry),
                    Err(err) => {
                        decode_error = Some(err);
                        false
                    },
                }
            })
            .await?;
        decode_error.map_or(Ok(()), Err)
    }

    /// Visit entries with values decoded as counters; undersized values
    /// read as `0`.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or a cancellation error.
    pub async fn run_counters<F>(self, mut callback: F) -> Result<()>
    where
        F: FnMut(CounterEntry) -> bool + Send,
    {
        let (store, ctx, request) = self.into_request();
        store
            .enumerate_raw(ctx, &request, &mut |raw: RawEntry| {
                callback(raw.into_counter())
            })
            .await
    }

    /// Collect every matching entry.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or a cancellation error.
    pub async fn collect(self) -> Result<Vec<RawEntry>> {
        let mut entries = Vec::new();
        self.run(|entry| {
            entries.push(entry);
            true
        })
        .await?;
        Ok(entries)
    }

    /// Collect every matching key.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or a cancellation error.
    pub async fn keys(self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.only_keys()
            .run(|entry| {
                keys.push(entry.key);
                true
            })
            .await?;
        Ok(keys)
    }
}
