//! In-memory storage engine.
//!
//! Provides a fast, non-persistent ordered key-value store. Ideal for
//! testing, development, and embedded use cases.
//!
//! Entries live in a `BTreeMap` behind a `parking_lot::RwLock`; every
//! mutating call takes the write lock once, so single operations
//! (including compare-and-set and increment) are atomic. Expired entries
//! are invisible to reads and are purged lazily by [`MemoryStore::purge_expired`]
//! and [`DataStoreManager::compact`].
//!
//! `MemoryStore` implements every capability set, including ambient
//! optimistic transactions (see the `transaction` submodule).

mod transaction;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use self::transaction::{MemoryTransaction, TxnState};
use super::backup::{self, BackupRecord};
use super::{ScanCursor, ScanPage, apply_increment, ceil_secs, check_discard_ratio, drive_scan, unix_millis_now};
use crate::config::StoreConfig;
use crate::constants::{MAX_TTL, NO_TTL};
use crate::context::Context;
use crate::entry::RawEntry;
use crate::error::{Error, Result};
use crate::store::{DataStore, DataStoreManager, EnumerateRequest, Transaction, TransactionalManager};

/// Expiry instant for a TTL in seconds, clamped to [`MAX_TTL`]; `0` means
/// no expiry.
pub(crate) fn expiry_from_ttl(ttl: u64, now: Instant) -> Option<Instant> {
    if ttl == NO_TTL {
        None
    } else {
        now.checked_add(Duration::from_secs(ttl.min(MAX_TTL)))
    }
}

/// Entry stored in the memory engine.
#[derive(Debug, Clone)]
pub(crate) struct StoredValue {
    pub value: Vec<u8>,
    pub expires_at: Option<Instant>,
    pub version: i64,
}

impl StoredValue {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn to_entry(&self, key: Vec<u8>, now: Instant, only_keys: bool) -> RawEntry {
        RawEntry {
            key,
            value: if only_keys { Vec::new() } else { self.value.clone() },
            ttl: remaining_ttl(self.expires_at, now),
            version: self.version,
        }
    }
}

/// Remaining TTL in whole seconds, `0` for eternal.
pub(crate) fn remaining_ttl(expires_at: Option<Instant>, now: Instant) -> u64 {
    expires_at.map_or(NO_TTL, |exp| ceil_secs(exp.saturating_duration_since(now)).max(1))
}

/// Committed state: ordered data plus the version counter.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    data: BTreeMap<Vec<u8>, StoredValue>,
    last_version: i64,
}

impl Tables {
    pub fn live(&self, key: &[u8], now: Instant) -> Option<&StoredValue> {
        self.data.get(key).filter(|stored| !stored.is_expired(now))
    }

    /// Highest version assigned so far.
    pub fn last_version(&self) -> i64 {
        self.last_version
    }

    /// Version of the live entry, `0` when absent or expired.
    pub fn live_version(&self, key: &[u8], now: Instant) -> i64 {
        self.live(key, now).map_or(0, |stored| stored.version)
    }

    /// Upsert with a fresh version; returns the version.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>, expires_at: Option<Instant>) -> i64 {
        self.last_version += 1;
        let version = self.last_version;
        self.data.insert(
            key.to_vec(),
            StoredValue {
                value,
                expires_at,
                version,
            },
        );
        version
    }

    /// Change expiry of a live entry; false if absent.
    pub fn touch(&mut self, key: &[u8], expires_at: Option<Instant>, now: Instant) -> bool {
        match self.data.get_mut(key) {
            Some(stored) if !stored.is_expired(now) => {
                stored.expires_at = expires_at;
                true
            },
            _ => false,
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn increment(
        &mut self,
        key: &[u8],
        initial: i64,
        delta: i64,
        ttl: u64,
        now: Instant,
    ) -> i64 {
        let current = self.live(key, now);
        let kept_expiry = current.and_then(|stored| stored.expires_at);
        let (previous, next) = apply_increment(current.map(|s| s.value.as_slice()), initial, delta);
        let expires_at = expiry_from_ttl(ttl, now).or(kept_expiry);
        self.put(key, next, expires_at);
        previous
    }

    /// Live entries within the cursor bounds, in scan order.
    pub fn range_entries(&self, cursor: &ScanCursor, now: Instant) -> Vec<RawEntry> {
        if cursor.is_empty() {
            return Vec::new();
        }
        let range = self.data.range::<[u8], _>(cursor.bounds());
        let live = |(key, stored): (&Vec<u8>, &StoredValue)| {
            (!stored.is_expired(now)).then(|| stored.to_entry(key.clone(), now, cursor.only_keys))
        };
        if cursor.reverse {
            range.rev().filter_map(live).collect()
        } else {
            range.filter_map(live).collect()
        }
    }

    pub fn scan_page(&self, cursor: &ScanCursor, now: Instant) -> ScanPage {
        if cursor.is_empty() {
            return ScanPage {
                exhausted: true,
                ..ScanPage::default()
            };
        }
        let range = self.data.range::<[u8], _>(cursor.bounds());
        if cursor.reverse {
            collect_page(range.rev(), cursor, now)
        } else {
            collect_page(range, cursor, now)
        }
    }

    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.data.len();
        self.data.retain(|_, stored| !stored.is_expired(now));
        before - self.data.len()
    }
}

fn collect_page<'a>(
    rows: impl Iterator<Item = (&'a Vec<u8>, &'a StoredValue)>,
    cursor: &ScanCursor,
    now: Instant,
) -> ScanPage {
    let mut page = ScanPage::default();
    let mut scanned = 0;
    for (key, stored) in rows.take(cursor.limit) {
        scanned += 1;
        page.last_key = Some(key.clone());
        if !stored.is_expired(now) {
            page.entries
                .push(stored.to_entry(key.clone(), now, cursor.only_keys));
        }
    }
    page.exhausted = scanned < cursor.limit;
    page
}

/// State shared between the store handle and its transactions.
#[derive(Debug)]
pub(crate) struct Shared {
    config: StoreConfig,
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

/// In-memory key-value engine.
///
/// All data is lost when the last handle is dropped. Ideal for:
/// - Testing and development
/// - Embedded applications
/// - Temporary caching
///
/// # Thread Safety
///
/// `MemoryStore` is `Clone`; clones share the same data.
///
/// # Example
///
/// ```ignore
/// use kvdeck::{Context, DataStoreExt, MemoryStore};
///
/// let store = MemoryStore::named("sessions");
/// store.set(&Context::background()).by_key("key").binary(b"value".to_vec()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_valid_config(StoreConfig::default())
    }

    /// Creates an empty store with the given logical name.
    ///
    /// An empty name falls back to the default name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        let config = if name.is_empty() {
            StoreConfig::default()
        } else {
            StoreConfig::new(name)
        };
        Self::from_valid_config(config)
    }

    /// Creates an empty store with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the configuration is invalid.
    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                tables: RwLock::new(Tables::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the number of stored entries (including expired).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.tables.read().data.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.tables.read().data.is_empty()
    }

    /// Removes all expired entries and returns how many were dropped.
    ///
    /// Expired entries are otherwise only hidden from reads.
    pub fn purge_expired(&self) -> usize {
        self.shared.tables.write().purge_expired(Instant::now())
    }

    fn prepare(&self, ctx: &Context) -> Result<()> {
        self.shared.ensure_open()?;
        ctx.check()
    }

    /// The ambient transaction for this store, if `ctx` carries one.
    fn ambient(&self, ctx: &Context) -> Result<Option<Arc<TxnState>>> {
        let Some(tx) = ctx.transaction(self.name()) else {
            return Ok(None);
        };
        let foreign = || {
            Error::invalid_request(format!(
                "transaction {} in context does not belong to memory store '{}'",
                tx.id(),
                self.name()
            ))
        };
        let state = tx.instance().downcast::<TxnState>().map_err(|_| foreign())?;
        if !state.belongs_to(&self.shared) {
            return Err(foreign());
        }
        Ok(Some(state))
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    async fn close(&self) -> Result<()> {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!(store = self.name(), "Memory store closed");
        }
        Ok(())
    }

    async fn get_raw(
        &self,
        ctx: &Context,
        key: &[u8],
        required: bool,
    ) -> Result<Option<RawEntry>> {
        self.prepare(ctx)?;
        let entry = match self.ambient(ctx)? {
            Some(txn) => txn.get(key)?,
            None => {
                let now = Instant::now();
                let tables = self.shared.tables.read();
                tables
                    .live(key, now)
                    .map(|stored| stored.to_entry(key.to_vec(), now, false))
            },
        };
        match entry {
            None if required => Err(Error::NotFound),
            entry => Ok(entry),
        }
    }

    async fn set_raw(&self, ctx: &Context, key: &[u8], value: Vec<u8>, ttl: u64) -> Result<()> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            return txn.set(key, value, ttl);
        }
        let expires_at = expiry_from_ttl(ttl, Instant::now());
        self.shared.tables.write().put(key, value, expires_at);
        Ok(())
    }

    async fn compare_and_set_raw(
        &self,
        ctx: &Context,
        key: &[u8],
        value: Vec<u8>,
        ttl: u64,
        version: i64,
    ) -> Result<bool> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            return txn.compare_and_set(key, value, ttl, version);
        }
        let now = Instant::now();
        let mut tables = self.shared.tables.write();
        if tables.live_version(key, now) != version {
            return Ok(false);
        }
        tables.put(key, value, expiry_from_ttl(ttl, now));
        Ok(true)
    }

    async fn increment_raw(
        &self,
        ctx: &Context,
        key: &[u8],
        initial: i64,
        delta: i64,
        ttl: u64,
    ) -> Result<i64> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            return txn.increment(key, initial, delta, ttl);
        }
        let now = Instant::now();
        Ok(self
            .shared
            .tables
            .write()
            .increment(key, initial, delta, ttl, now))
    }

    async fn touch_raw(&self, ctx: &Context, key: &[u8], ttl: u64) -> Result<()> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            return txn.touch(key, ttl);
        }
        let now = Instant::now();
        if self
            .shared
            .tables
            .write()
            .touch(key, expiry_from_ttl(ttl, now), now)
        {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn remove_raw(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            return txn.remove(key);
        }
        self.shared.tables.write().remove(key);
        Ok(())
    }

    async fn enumerate_raw(
        &self,
        ctx: &Context,
        request: &EnumerateRequest,
        callback: &mut (dyn FnMut(RawEntry) -> bool + Send),
    ) -> Result<()> {
        self.prepare(ctx)?;
        if let Some(txn) = self.ambient(ctx)? {
            let cursor = ScanCursor::new(request);
            let entries = txn.snapshot(&cursor)?;
            for entry in entries {
                if !entry.key.starts_with(&request.prefix) {
                    continue;
                }
                ctx.check()?;
                if !callback(entry) {
                    break;
                }
            }
            return Ok(());
        }
        let shared = &self.shared;
        drive_scan(
            ctx,
            request,
            |cursor| {
                let page = shared.tables.read().scan_page(&cursor, Instant::now());
                std::future::ready(Ok(page))
            },
            callback,
        )
        .await
    }
}

#[async_trait]
impl DataStoreManager for MemoryStore {
    async fn compact(&self, discard_ratio: f64) -> Result<()> {
        self.shared.ensure_open()?;
        check_discard_ratio(discard_ratio)?;
        let purged = self.purge_expired();
        info!(store = self.name(), purged, "Memory store compacted");
        Ok(())
    }

    async fn backup(&self, writer: &mut (dyn Write + Send), since: i64) -> Result<i64> {
        self.shared.ensure_open()?;
        let records: Vec<BackupRecord> = {
            let now = Instant::now();
            let now_ms = unix_millis_now();
            let tables = self.shared.tables.read();
            tables
                .data
                .iter()
                .filter(|(_, stored)| stored.version > since && !stored.is_expired(now))
                .map(|(key, stored)| BackupRecord {
                    key: key.clone(),
                    value: stored.value.clone(),
                    expires_at: stored.expires_at.map(|exp| {
                        let left = exp.saturating_duration_since(now).as_millis();
                        now_ms.saturating_add(u64::try_from(left).unwrap_or(u64::MAX))
                    }),
                    version: stored.version,
                })
                .collect()
        };
        let max_version = backup::write_records(writer, &records, since)?;
        info!(
            store = self.name(),
            since,
            entries = records.len(),
            max_version,
            "Memory store backup written"
        );
        Ok(max_version)
    }

    async fn restore(&self, reader: &mut (dyn BufRead + Send)) -> Result<()> {
        self.shared.ensure_open()?;
        let records = backup::read_records(reader)?;
        let now = Instant::now();
        let now_ms = unix_millis_now();
        let mut restored = 0usize;
        let mut tables = self.shared.tables.write();
        for record in records {
            let expires_at = match record.expires_at {
                Some(exp) if exp <= now_ms => continue,
                Some(exp) => now.checked_add(Duration::from_millis(exp - now_ms)),
                None => None,
            };
            tables.last_version = tables.last_version.max(record.version);
            tables.data.insert(
                record.key,
                StoredValue {
                    value: record.value,
                    expires_at,
                    version: record.version,
                },
            );
            restored += 1;
        }
        info!(store = self.name(), restored, "Memory store restored");
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.tables.write().data.clear();
        info!(store = self.name(), "Dropped all entries");
        Ok(())
    }

    async fn drop_with_prefix(&self, prefix: &[u8]) -> Result<()> {
        self.shared.ensure_open()?;
        let mut tables = self.shared.tables.write();
        let before = tables.data.len();
        tables.data.retain(|key, _| !key.starts_with(prefix));
        let dropped = before - tables.data.len();
        info!(store = self.name(), dropped, "Dropped entries with prefix");
        Ok(())
    }
}

#[async_trait]
impl TransactionalManager for MemoryStore {
    async fn begin_transaction(&self, ctx: &Context, read_only: bool) -> Result<Context> {
        self.prepare(ctx)?;
        if let Some(nested) = crate::transaction::nest_transaction(ctx, self.name(), read_only)? {
            return Ok(nested);
        }
        let tx = MemoryTransaction::begin(Arc::clone(&self.shared), read_only);
        debug!(store = self.name(), tx = tx.id(), read_only, "Transaction started");
        Ok(ctx.with_transaction(self.name(), Arc::new(tx)))
    }

    async fn end_transaction(&self, ctx: &Context, outcome: Option<Error>) -> Result<()> {
        crate::transaction::end_transaction(self.name(), ctx, outcome).await
    }
}
