//! Redb-backed storage engine.
//!
//! Provides persistent key-value storage using redb with ACID guarantees.
//! Every raw operation runs in its own redb transaction on the blocking
//! thread pool, so compare-and-set and increment are atomic. Ambient
//! transactions are not supported; `RedbStore` implements the
//! [`DataStoreManager`] capability only.
//!
//! Entries are stored as JSON (`StoredEntry`) under the raw key. Expiry is
//! kept as unix milliseconds so it survives restarts, and the version
//! counter lives in a separate metadata table.

use async_trait::async_trait;
use parking_lot::RwLock;
use ::redb::{
    AccessGuard, Database, ReadOnlyTable, ReadableDatabase, ReadableTable, StorageError, Table,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

use super::backup::{self, BackupRecord};
use super::{ScanCursor, ScanPage, apply_increment, check_discard_ratio, drive_scan, unix_millis_now};
use crate::config::StoreConfig;
use crate::constants::{MAX_TTL, NO_TTL};
use crate::context::Context;
use crate::entry::RawEntry;
use crate::error::{Error, Result};
use crate::store::{DataStore, DataStoreManager, EnumerateRequest};

/// Table of raw keys to JSON-encoded entries.
pub(crate) const DATA_TABLE: TableDefinition<'static, &'static [u8], &'static [u8]> =
    TableDefinition::new("kv");

/// Engine metadata (the version counter).
pub(crate) const META_TABLE: TableDefinition<'static, &'static str, i64> =
    TableDefinition::new("kv_meta");

const LAST_VERSION: &str = "last_version";

/// Entry with expiration and version metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: Vec<u8>,
    /// Unix milliseconds; `None` never expires.
    expires_at: Option<u64>,
    version: i64,
}

impl StoredEntry {
    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::internal(format!("Failed to deserialize entry: {e}")))
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::internal(format!("Failed to serialize entry to JSON: {e}")))
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|exp| now_ms >= exp)
    }

    fn into_entry(self, key: Vec<u8>, now_ms: u64, only_keys: bool) -> RawEntry {
        let ttl = self
            .expires_at
            .map_or(NO_TTL, |exp| exp.saturating_sub(now_ms).div_ceil(1000).max(1));
        RawEntry {
            key,
            value: if only_keys { Vec::new() } else { self.value },
            ttl,
            version: self.version,
        }
    }
}

fn expiry_ms(ttl: u64, now_ms: u64) -> Option<u64> {
    (ttl != NO_TTL).then(|| now_ms.saturating_add(ttl.min(MAX_TTL) * 1000))
}

/// Map a redb failure into [`Error::Internal`], logging it once.
fn db_err<E: Into<::redb::Error>>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |err| {
        let err: ::redb::Error = err.into();
        error!(error = %err, "{context}");
        Error::internal(format!("{context}: {err}"))
    }
}

/// Open write transaction with both tables.
struct Writer<'txn> {
    data: Table<'txn, &'static [u8], &'static [u8]>,
    meta: Table<'txn, &'static str, i64>,
    now_ms: u64,
}

impl Writer<'_> {
    fn live(&self, key: &[u8]) -> Result<Option<StoredEntry>> {
        let Some(guard) = self
            .data
            .get(key)
            .map_err(db_err("Failed to read key"))?
        else {
            return Ok(None);
        };
        let entry = StoredEntry::decode(guard.value())?;
        Ok((!entry.is_expired(self.now_ms)).then_some(entry))
    }

    fn store(&mut self, key: &[u8], entry: &StoredEntry) -> Result<()> {
        let bytes = entry.encode()?;
        self.data
            .insert(key, bytes.as_slice())
            .map_err(db_err("Failed to insert key"))?;
        Ok(())
    }

    fn last_version(&self) -> Result<i64> {
        Ok(self
            .meta
            .get(LAST_VERSION)
            .map_err(db_err("Failed to read version counter"))?
            .map_or(0, |guard| guard.value()))
    }

    fn set_last_version(&mut self, version: i64) -> Result<()> {
        self.meta
            .insert(LAST_VERSION, version)
            .map_err(db_err("Failed to update version counter"))?;
        Ok(())
    }

    /// Upsert with a fresh version; returns the version.
    fn put(&mut self, key: &[u8], value: Vec<u8>, expires_at: Option<u64>) -> Result<i64> {
        let version = self.last_version()? + 1;
        self.set_last_version(version)?;
        self.store(
            key,
            &StoredEntry {
                value,
                expires_at,
                version,
            },
        )?;
        Ok(version)
    }
}

fn collect_page<'a, I>(rows: I, cursor: &ScanCursor, now_ms: u64) -> Result<ScanPage>
where
    I: Iterator<
        Item = std::result::Result<
            (AccessGuard<'a, &'static [u8]>, AccessGuard<'a, &'static [u8]>),
            StorageError,
        >,
    >,
{
    let mut page = ScanPage::default();
    let mut scanned = 0;
    for row in rows.take(cursor.limit) {
        let (key, value) = row.map_err(db_err("Failed to read KV entry"))?;
        scanned += 1;
        let key = key.value().to_vec();
        let entry = StoredEntry::decode(value.value())?;
        if !entry.is_expired(now_ms) {
            page.entries
                .push(entry.into_entry(key.clone(), now_ms, cursor.only_keys));
        }
        page.last_key = Some(key);
    }
    page.exhausted = scanned < cursor.limit;
    Ok(page)
}

struct Inner {
    db: RwLock<Database>,
    path: PathBuf,
    config: StoreConfig,
    closed: AtomicBool,
}

impl Inner {
    fn read<T>(&self, op: impl FnOnce(&ReadOnlyTable<&'static [u8], &'static [u8]>) -> Result<T>) -> Result<T> {
        let db = self.db.read();
        let txn = db
            .begin_read()
            .map_err(db_err("Failed to begin read transaction"))?;
        let table = txn
            .open_table(DATA_TABLE)
            .map_err(db_err("Failed to open KV table"))?;
        op(&table)
    }

    fn update<T>(&self, op: impl FnOnce(&mut Writer<'_>) -> Result<T>) -> Result<T> {
        let db = self.db.read();
        let txn = db
            .begin_write()
            .map_err(db_err("Failed to begin write transaction"))?;
        let outcome = {
            let mut writer = Writer {
                data: txn
                    .open_table(DATA_TABLE)
                    .map_err(db_err("Failed to open KV table"))?,
                meta: txn
                    .open_table(META_TABLE)
                    .map_err(db_err("Failed to open metadata table"))?,
                now_ms: unix_millis_now(),
            };
            op(&mut writer)
        };
        match outcome {
            Ok(value) => {
                txn.commit()
                    .map_err(db_err("Failed to commit write transaction"))?;
                Ok(value)
            },
            Err(err) => {
                txn.abort()
                    .map_err(db_err("Failed to abort write transaction"))?;
                Err(err)
            },
        }
    }

    fn get_sync(&self, key: &[u8]) -> Result<Option<RawEntry>> {
        self.read(|table| {
            let Some(guard) = table.get(key).map_err(db_err("Failed to read key"))? else {
                return Ok(None);
            };
            let now_ms = unix_millis_now();
            let entry = StoredEntry::decode(guard.value())?;
            Ok((!entry.is_expired(now_ms)).then(|| entry.into_entry(key.to_vec(), now_ms, false)))
        })
    }

    fn scan_sync(&self, cursor: &ScanCursor) -> Result<ScanPage> {
        self.read(|table| {
            let now_ms = unix_millis_now();
            let range = table
                .range::<&[u8]>(cursor.bounds())
                .map_err(db_err("Failed to iterate KV table"))?;
            if cursor.reverse {
                collect_page(range.rev(), cursor, now_ms)
            } else {
                collect_page(range, cursor, now_ms)
            }
        })
    }

    fn backup_sync(&self, since: i64) -> Result<Vec<BackupRecord>> {
        self.read(|table| {
            let now_ms = unix_millis_now();
            let mut records = Vec::new();
            for row in table.iter().map_err(db_err("Failed to iterate KV table"))? {
                let (key, value) = row.map_err(db_err("Failed to read KV entry"))?;
                let entry = StoredEntry::decode(value.value())?;
                if entry.version <= since || entry.is_expired(now_ms) {
                    continue;
                }
                records.push(BackupRecord {
                    key: key.value().to_vec(),
                    value: entry.value,
                    expires_at: entry.expires_at,
                    version: entry.version,
                });
            }
            Ok(records)
        })
    }

    fn restore_sync(&self, records: Vec<BackupRecord>) -> Result<usize> {
        self.update(|writer| {
            let mut last_version = writer.last_version()?;
            let mut restored = 0;
            for record in records {
                if record.expires_at.is_some_and(|exp| writer.now_ms >= exp) {
                    continue;
                }
                last_version = last_version.max(record.version);
                writer.store(
                    &record.key,
                    &StoredEntry {
                        value: record.value,
                        expires_at: record.expires_at,
                        version: record.version,
                    },
                )?;
                restored += 1;
            }
            writer.set_last_version(last_version)?;
            Ok(restored)
        })
    }

    /// Keep only entries for which `keep` returns true.
    fn retain_sync(&self, keep: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let mut keep = keep;
        self.update(|writer| {
            writer
                .data
                .retain(|key, value| keep(key, value))
                .map_err(db_err("Failed to drop entries"))
        })
    }
}

/// Persistent key-value engine on redb.
///
/// Suitable for production use where durability is required.
///
/// # Thread Safety
///
/// `RedbStore` is `Clone` and can be shared across tasks. Blocking redb
/// calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct RedbStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore")
            .field("name", &self.inner.config.name)
            .field("path", &self.inner.path)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Opens or creates a redb database at the given path with the default
    /// configuration.
    ///
    /// # Errors
    ///
    /// See [`RedbStore::open_with_config`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens or creates a redb database at the given path.
    ///
    /// Creates parent directories if needed and initializes the tables on
    /// first open.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Parent directory cannot be created
    /// - Database file cannot be opened or created (permissions, disk full, etc.)
    /// - Initialization transaction fails to begin or commit
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(db_err("Failed to open KV database"))?;

        let write_txn = db
            .begin_write()
            .map_err(db_err("Failed to begin initialization transaction"))?;
        {
            write_txn
                .open_table(DATA_TABLE)
                .map_err(db_err("Failed to initialize KV table"))?;
            write_txn
                .open_table(META_TABLE)
                .map_err(db_err("Failed to initialize metadata table"))?;
        }
        write_txn
            .commit()
            .map_err(db_err("Failed to commit initialization transaction"))?;

        info!(store = %config.name, path = %path.display(), "Redb store opened");
        Ok(Self {
            inner: Arc::new(Inner {
                db: RwLock::new(db),
                path: path.to_path_buf(),
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn prepare(&self, ctx: &Context) -> Result<()> {
        self.ensure_open()?;
        ctx.check()?;
        if let Some(tx) = ctx.transaction(self.name()) {
            return Err(Error::invalid_request(format!(
                "redb store '{}' cannot join transaction {}",
                self.name(),
                tx.id()
            )));
        }
        Ok(())
    }

    /// Run `op` on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| Error::internal(format!("Task join error: {e}")))?
    }
}

#[async_trait]
impl DataStore for RedbStore {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    async fn close(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(store = self.name(), "Redb store closed");
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
        let key = key.to_vec();
        match self.blocking(move |inner| inner.get_sync(&key)).await? {
            None if required => Err(Error::NotFound),
            entry => Ok(entry),
        }
    }

    async fn set_raw(&self, ctx: &Context, key: &[u8], value: Vec<u8>, ttl: u64) -> Result<()> {
        self.prepare(ctx)?;
        let key = key.to_vec();
        self.blocking(move |inner| {
            inner.update(|writer| {
                let expires_at = expiry_ms(ttl, writer.now_ms);
                writer.put(&key, value, expires_at).map(|_| ())
            })
        })
        .await
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
        let key = key.to_vec();
        self.blocking(move |inner| {
            inner.update(|writer| {
                let current = writer.live(&key)?.map_or(0, |entry| entry.version);
                if current != version {
                    return Ok(false);
                }
                let expires_at = expiry_ms(ttl, writer.now_ms);
                writer.put(&key, value, expires_at)?;
                Ok(true)
            })
        })
        .await
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
        let key = key.to_vec();
        self.blocking(move |inner| {
            inner.update(|writer| {
                let current = writer.live(&key)?;
                let kept_expiry = current.as_ref().and_then(|entry| entry.expires_at);
                let (previous, next) =
                    apply_increment(current.as_ref().map(|e| e.value.as_slice()), initial, delta);
                let expires_at = expiry_ms(ttl, writer.now_ms).or(kept_expiry);
                writer.put(&key, next, expires_at)?;
                Ok(previous)
            })
        })
        .await
    }

    async fn touch_raw(&self, ctx: &Context, key: &[u8], ttl: u64) -> Result<()> {
        self.prepare(ctx)?;
        let key = key.to_vec();
        self.blocking(move |inner| {
            inner.update(|writer| {
                let Some(mut entry) = writer.live(&key)? else {
                    return Err(Error::NotFound);
                };
                entry.expires_at = expiry_ms(ttl, writer.now_ms);
                writer.store(&key, &entry)
            })
        })
        .await
    }

    async fn remove_raw(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        self.prepare(ctx)?;
        let key = key.to_vec();
        self.blocking(move |inner| {
            inner.update(|writer| {
                writer
                    .data
                    .remove(key.as_slice())
                    .map_err(db_err("Failed to remove key"))?;
                Ok(())
            })
        })
        .await
    }

    async fn enumerate_raw(
        &self,
        ctx: &Context,
        request: &EnumerateRequest,
        callback: &mut (dyn FnMut(RawEntry) -> bool + Send),
    ) -> Result<()> {
        self.prepare(ctx)?;
        drive_scan(
            ctx,
            request,
            |cursor| self.blocking(move |inner| inner.scan_sync(&cursor)),
            callback,
        )
        .await
    }
}

#[async_trait]
impl DataStoreManager for RedbStore {
    async fn compact(&self, discard_ratio: f64) -> Result<()> {
        self.ensure_open()?;
        check_discard_ratio(discard_ratio)?;
        let compacted = self
            .blocking(|inner| {
                let now_ms = unix_millis_now();
                inner.retain_sync(|_, value| {
                    StoredEntry::decode(value).map_or(true, |entry| !entry.is_expired(now_ms))
                })?;
                inner
                    .db
                    .write()
                    .compact()
                    .map_err(db_err("Failed to compact database"))
            })
            .await?;
        info!(store = self.name(), compacted, "Redb store compacted");
        Ok(())
    }

    async fn backup(&self, writer: &mut (dyn Write + Send), since: i64) -> Result<i64> {
        self.ensure_open()?;
        let records = self.blocking(move |inner| inner.backup_sync(since)).await?;
        let max_version = backup::write_records(writer, &records, since)?;
        info!(
            store = self.name(),
            since,
            entries = records.len(),
            max_version,
            "Redb store backup written"
        );
        Ok(max_version)
    }

    async fn restore(&self, reader: &mut (dyn BufRead + Send)) -> Result<()> {
        self.ensure_open()?;
        let records = backup::read_records(reader)?;
        let restored = self
            .blocking(move |inner| inner.restore_sync(records))
            .await?;
        info!(store = self.name(), restored, "Redb store restored");
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        self.ensure_open()?;
        self.blocking(|inner| inner.retain_sync(|_, _| false)).await?;
        info!(store = self.name(), "Dropped all entries");
        Ok(())
    }

    async fn drop_with_prefix(&self, prefix: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let prefix = prefix.to_vec();
        self.blocking(move |inner| inner.retain_sync(|key, _| !key.starts_with(&prefix)))
            .await?;
        info!(store = self.name(), "Dropped entries with prefix");
        Ok(())
    }
}
