//! Raw contract and capability traits.
//!
//! An engine declares what it can do by implementing capability traits:
//!
//! - [`DataStore`] - the raw primitives every engine must provide
//! - [`DataStoreManager`] - administrative pass-through operations
//! - [`TransactionalManager`] - ambient transactions carried in a [`Context`]
//!
//! Combinations ([`ManagedDataStore`], [`TransactionalDataStore`],
//! [`ManagedTransactionalDataStore`]) are implemented automatically for any
//! engine that has all the parts.
//!
//! Callers normally go through the builders from [`DataStoreExt`] rather
//! than the `*_raw` methods directly.

use async_trait::async_trait;
use std::any::Any;
use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::entry::RawEntry;
use crate::error::{Error, Result};
use crate::ops::{
    CompareAndSetOperation, EnumerateOperation, GetOperation, IncrementOperation,
    RemoveOperation, SetOperation, TouchOperation,
};
use crate::transaction::TransactionState;

/// Parameters of a raw enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateRequest {
    /// Only keys starting with this prefix are surfaced.
    pub prefix: Vec<u8>,
    /// Start position. Ascending scans begin at the first key `>= seek`;
    /// descending scans at the last key `<= seek`, or at the end of the
    /// prefix range when `seek` equals the prefix.
    pub seek: Vec<u8>,
    /// Rows fetched per page.
    pub batch_size: usize,
    /// Skip values; entries carry an empty value.
    pub only_keys: bool,
    /// Descending key order.
    pub reverse: bool,
}

/// Raw key-value contract every engine implements.
///
/// All engines must be thread-safe (`Send + Sync`) for use with tokio and
/// must check the context before acting, failing with
/// [`Error::Canceled`] or [`Error::DeadlineExceeded`] once it is done.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stable logical name; the key of this store's ambient transactions.
    fn name(&self) -> &str;

    /// Configuration injected at construction.
    fn config(&self) -> &StoreConfig;

    /// Release the store. Every later operation fails with
    /// [`Error::AlreadyClosed`]. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing engine resources fails.
    async fn close(&self) -> Result<()>;

    /// Reads the entry stored under `key`, with its TTL and version.
    ///
    /// Absent or expired keys yield `Ok(None)`, or [`Error::NotFound`] when
    /// `required` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is required and absent, or the engine fails.
    async fn get_raw(&self, ctx: &Context, key: &[u8], required: bool)
    -> Result<Option<RawEntry>>;

    /// Unconditional upsert. Assigns a new version; `ttl == 0` is eternal.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a transaction rejects the write.
    async fn set_raw(&self, ctx: &Context, key: &[u8], value: Vec<u8>, ttl: u64) -> Result<()>;

    /// Writes only if the stored version equals `version`.
    ///
    /// `version == 0` means the key must not exist. A mismatch returns
    /// `Ok(false)` and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a transaction rejects the write.
    async fn compare_and_set_raw(
        &self,
        ctx: &Context,
        key: &[u8],
        value: Vec<u8>,
        ttl: u64,
        version: i64,
    ) -> Result<bool>;

    /// Atomically adds `delta` to the big-endian counter at `key` and
    /// returns the value before the addition.
    ///
    /// An absent key is seeded with `initial`, which is also what gets
    /// reported as the previous value. `ttl > 0` sets a new expiry;
    /// `ttl == 0` keeps an existing entry's expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a transaction rejects the write.
    async fn increment_raw(
        &self,
        ctx: &Context,
        key: &[u8],
        initial: i64,
        delta: i64,
        ttl: u64,
    ) -> Result<i64>;

    /// Resets the TTL without touching value or version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key is absent.
    async fn touch_raw(&self, ctx: &Context, key: &[u8], ttl: u64) -> Result<()>;

    /// Deletes `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or a transaction rejects the write.
    async fn remove_raw(&self, ctx: &Context, key: &[u8]) -> Result<()>;

    /// Calls `callback` for each entry matching the request until it
    /// returns `false` or the range is exhausted.
    ///
    /// Entries outside `request.prefix` are never surfaced, and the result
    /// set and order do not depend on `request.batch_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails or the context is done.
    async fn enumerate_raw(
        &self,
        ctx: &Context,
        request: &EnumerateRequest,
        callback: &mut (dyn FnMut(RawEntry) -> bool + Send),
    ) -> Result<()>;
}

/// Administrative operations, delegated straight to the engine.
#[async_trait]
pub trait DataStoreManager: Send + Sync {
    /// Compact storage. `discard_ratio` must lie strictly between 0 and 1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an out-of-range ratio.
    async fn compact(&self, discard_ratio: f64) -> Result<()>;

    /// Write every entry with a version greater than `since` to `writer`.
    /// Returns the highest version written, or `since` if nothing was.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the engine or writing the stream fails.
    async fn backup(&self, writer: &mut (dyn Write + Send), since: i64) -> Result<i64>;

    /// Load a stream produced by [`DataStoreManager::backup`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or the engine fails.
    async fn restore(&self, reader: &mut (dyn BufRead + Send)) -> Result<()>;

    /// Delete everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    async fn drop_all(&self) -> Result<()>;

    /// Delete every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails.
    async fn drop_with_prefix(&self, prefix: &[u8]) -> Result<()>;
}

/// Transaction handle.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// True for read-only transactions.
    fn read_only(&self) -> bool;

    /// Current state.
    fn state(&self) -> TransactionState;

    /// Make pending writes durable. On error nothing was committed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConcurrentTransaction`] on conflict or
    /// [`Error::DiscardedTransaction`] if already finished.
    async fn commit(&self) -> Result<()>;

    /// Discard pending writes.
    fn rollback(&self);

    /// Engine-specific transaction object; engines downcast it.
    fn instance(&self) -> Arc<dyn Any + Send + Sync>;
}

/// Ambient transaction management.
#[async_trait]
pub trait TransactionalManager: Send + Sync {
    /// Derive a context carrying a new transaction for this store.
    ///
    /// The original context is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or the context is done.
    async fn begin_transaction(&self, ctx: &Context, read_only: bool) -> Result<Context>;

    /// Finish this store's transaction in `ctx`.
    ///
    /// With `outcome == None` the transaction is committed and the commit's
    /// own result is returned. With `Some(err)` it is rolled back and `err`
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the commit failure, or the original error on rollback.
    async fn end_transaction(&self, ctx: &Context, outcome: Option<Error>) -> Result<()>;
}

/// A store with administrative operations.
pub trait ManagedDataStore: DataStore + DataStoreManager {}

impl<T: DataStore + DataStoreManager + ?Sized> ManagedDataStore for T {}

/// A store with ambient transactions.
pub trait TransactionalDataStore: DataStore + TransactionalManager {}

impl<T: DataStore + TransactionalManager + ?Sized> TransactionalDataStore for T {}

/// A store with administrative operations and ambient transactions.
pub trait ManagedTransactionalDataStore:
    DataStore + DataStoreManager + TransactionalManager
{
}

impl<T: DataStore + DataStoreManager + TransactionalManager + ?Sized>
    ManagedTransactionalDataStore for T
{
}

/// Operation builders for any [`DataStore`].
///
/// Each method borrows the store and the request context for the lifetime
/// of the returned builder.
pub trait DataStoreExt: DataStore {
    /// Start a get.
    fn get<'a>(&'a self, ctx: &'a Context) -> GetOperation<'a, Self> {
        GetOperation::new(self, ctx)
    }

    /// Start an unconditional set.
    fn set<'a>(&'a self, ctx: &'a Context) -> SetOperation<'a, Self> {
        SetOperation::new(self, ctx)
    }

    /// Start a compare-and-set.
    fn compare_and_set<'a>(&'a self, ctx: &'a Context) -> CompareAndSetOperation<'a, Self> {
        CompareAndSetOperation::new(self, ctx)
    }

    /// Start an increment; the equivalent of `i++`, returning the previous value.
    fn increment<'a>(&'a self, ctx: &'a Context) -> IncrementOperation<'a, Self> {
        IncrementOperation::new(self, ctx)
    }

    /// Start a TTL reset.
    fn touch<'a>(&'a self, ctx: &'a Context) -> TouchOperation<'a, Self> {
        TouchOperation::new(self, ctx)
    }

    /// Start a removal.
    fn remove<'a>(&'a self, ctx: &'a Context) -> RemoveOperation<'a, Self> {
        RemoveOperation::new(self, ctx)
    }

    /// Start an enumeration.
    fn enumerate<'a>(&'a self, ctx: &'a Context) -> EnumerateOperation<'a, Self> {
        EnumerateOperation::new(self, ctx)
    }
}

impl<T: DataStore + ?Sized> DataStoreExt for T {}
