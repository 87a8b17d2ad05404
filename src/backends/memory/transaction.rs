//! Optimistic transactions for the memory engine.
//!
//! A transaction buffers its writes and remembers the committed version
//! of every key it reads (`0` for absent). Reads see the transaction's own
//! pending writes layered over committed state. Each buffered put carries
//! a provisional version above every version committed when it was
//! written, so compare-and-set inside the transaction sees its own writes
//! as changes. At commit the read set is
//! validated under the store's write lock: if any observed key changed,
//! the commit fails with [`Error::ConcurrentTransaction`] and nothing is
//! applied (first committer wins).
//!
//! Enumeration inside a transaction sees pending writes but does not add
//! the scanned range to the read set, so phantoms are not detected.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Shared, Tables, expiry_from_ttl, remaining_ttl};
use crate::backends::{ScanCursor, apply_increment};
use crate::entry::RawEntry;
use crate::error::{Error, Result};
use crate::store::Transaction;
use crate::transaction::TransactionState;

/// A buffered write.
#[derive(Debug, Clone)]
enum Pending {
    Put {
        value: Vec<u8>,
        expires_at: Option<Instant>,
        version: i64,
    },
    Touch {
        expires_at: Option<Instant>,
    },
    Delete,
}

/// What a transaction sees for one key.
struct Visible {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    version: i64,
}

#[derive(Debug)]
struct Buffer {
    state: TransactionState,
    /// Committed version observed per key.
    reads: HashMap<Vec<u8>, i64>,
    writes: BTreeMap<Vec<u8>, Pending>,
    /// Puts buffered so far; offsets provisional versions.
    puts: i64,
}

impl Buffer {
    /// Version for a new pending put, never equal to one this transaction
    /// has observed or handed out.
    fn provisional(&mut self, tables: &Tables) -> i64 {
        self.puts += 1;
        tables.last_version() + self.puts
    }

    /// Resolve `key` through pending writes and record the read.
    fn visible(&mut self, tables: &Tables, key: &[u8], now: Instant) -> Option<Visible> {
        let committed = tables.live(key, now);
        self.reads
            .entry(key.to_vec())
            .or_insert_with(|| committed.map_or(0, |stored| stored.version));
        match self.writes.get(key) {
            Some(Pending::Put {
                value,
                expires_at,
                version,
            }) => Some(Visible {
                value: value.clone(),
                expires_at: *expires_at,
                version: *version,
            }),
            Some(Pending::Touch { expires_at }) => committed.map(|stored| Visible {
                value: stored.value.clone(),
                expires_at: *expires_at,
                version: stored.version,
            }),
            Some(Pending::Delete) => None,
            None => committed.map(|stored| Visible {
                value: stored.value.clone(),
                expires_at: stored.expires_at,
                version: stored.version,
            }),
        }
    }

    fn buffer(&mut self, key: &[u8], pending: Pending, max_writes: usize) -> Result<()> {
        if !self.writes.contains_key(key) && self.writes.len() >= max_writes {
            return Err(Error::TransactionTooLarge);
        }
        self.writes.insert(key.to_vec(), pending);
        Ok(())
    }

    fn discard(&mut self, state: TransactionState) {
        self.state = state;
        self.reads.clear();
        self.writes.clear();
        self.puts = 0;
    }
}

/// Physical transaction state; this is what
/// [`Transaction::instance`] exposes for downcasting.
#[derive(Debug)]
pub(crate) struct TxnState {
    id: String,
    read_only: bool,
    shared: Arc<Shared>,
    buffer: Mutex<Buffer>,
}

impl TxnState {
    pub(super) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    fn max_writes(&self) -> usize {
        self.shared.config.max_transaction_writes
    }

    fn active(&self) -> Result<parking_lot::MutexGuard<'_, Buffer>> {
        let buffer = self.buffer.lock();
        buffer.state.ensure_active()?;
        Ok(buffer)
    }

    fn writable(&self) -> Result<parking_lot::MutexGuard<'_, Buffer>> {
        let buffer = self.active()?;
        if self.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        Ok(buffer)
    }

    pub(super) fn get(&self, key: &[u8]) -> Result<Option<RawEntry>> {
        let mut buffer = self.active()?;
        let now = Instant::now();
        let tables = self.shared.tables.read();
        Ok(buffer.visible(&tables, key, now).map(|seen| RawEntry {
            key: key.to_vec(),
            value: seen.value,
            ttl: remaining_ttl(seen.expires_at, now),
            version: seen.version,
        }))
    }

    pub(super) fn set(&self, key: &[u8], value: Vec<u8>, ttl: u64) -> Result<()> {
        let mut buffer = self.writable()?;
        let expires_at = expiry_from_ttl(ttl, Instant::now());
        let version = buffer.provisional(&self.shared.tables.read());
        let pending = Pending::Put {
            value,
            expires_at,
            version,
        };
        buffer.buffer(key, pending, self.max_writes())
    }

    pub(super) fn compare_and_set(
        &self,
        key: &[u8],
        value: Vec<u8>,
        ttl: u64,
        version: i64,
    ) -> Result<bool> {
        let mut buffer = self.writable()?;
        let now = Instant::now();
        let tables = self.shared.tables.read();
        let current = buffer.visible(&tables, key, now).map_or(0, |seen| seen.version);
        if current != version {
            return Ok(false);
        }
        let pending = Pending::Put {
            value,
            expires_at: expiry_from_ttl(ttl, now),
            version: buffer.provisional(&tables),
        };
        drop(tables);
        buffer.buffer(key, pending, self.max_writes())?;
        Ok(true)
    }

    pub(super) fn increment(&self, key: &[u8], initial: i64, delta: i64, ttl: u64) -> Result<i64> {
        let mut buffer = self.writable()?;
        let now = Instant::now();
        let tables = self.shared.tables.read();
        let seen = buffer.visible(&tables, key, now);
        let (previous, next) =
            apply_increment(seen.as_ref().map(|s| s.value.as_slice()), initial, delta);
        let pending = Pending::Put {
            value: next,
            expires_at: expiry_from_ttl(ttl, now).or(seen.and_then(|s| s.expires_at)),
            version: buffer.provisional(&tables),
        };
        drop(tables);
        buffer.buffer(key, pending, self.max_writes())?;
        Ok(previous)
    }

    pub(super) fn touch(&self, key: &[u8], ttl: u64) -> Result<()> {
        let mut buffer = self.writable()?;
        let now = Instant::now();
        let present = {
            let tables = self.shared.tables.read();
            buffer.visible(&tables, key, now).is_some()
        };
        if !present {
            return Err(Error::NotFound);
        }
        let expires_at = expiry_from_ttl(ttl, now);
        let pending = match buffer.writes.get(key) {
            Some(Pending::Put { value, version, .. }) => Pending::Put {
                value: value.clone(),
                expires_at,
                version: *version,
            },
            _ => Pending::Touch { expires_at },
        };
        buffer.buffer(key, pending, self.max_writes())
    }

    pub(super) fn remove(&self, key: &[u8]) -> Result<()> {
        let mut buffer = self.writable()?;
        buffer.buffer(key, Pending::Delete, self.max_writes())
    }

    /// Entries within the cursor bounds as this transaction sees them, in
    /// scan order.
    pub(super) fn snapshot(&self, cursor: &ScanCursor) -> Result<Vec<RawEntry>> {
        let buffer = self.active()?;
        if cursor.is_empty() {
            return Ok(Vec::new());
        }
        let now = Instant::now();
        let mut merged: BTreeMap<Vec<u8>, RawEntry> = {
            let tables = self.shared.tables.read();
            let mut forward = cursor.clone();
            forward.reverse = false;
            tables
                .range_entries(&forward, now)
                .into_iter()
                .map(|entry| (entry.key.clone(), entry))
                .collect()
        };

        let bounds = cursor.bounds();
        for (key, pending) in buffer.writes.range::<[u8], _>(bounds) {
            match pending {
                Pending::Put {
                    value,
                    expires_at,
                    version,
                } => {
                    merged.insert(
                        key.clone(),
                        RawEntry {
                            key: key.clone(),
                            value: if cursor.only_keys { Vec::new() } else { value.clone() },
                            ttl: remaining_ttl(*expires_at, now),
                            version: *version,
                        },
                    );
                },
                Pending::Touch { expires_at } => {
                    if let Some(entry) = merged.get_mut(key) {
                        entry.ttl = remaining_ttl(*expires_at, now);
                    }
                },
                Pending::Delete => {
                    merged.remove(key);
                },
            }
        }

        let entries = merged.into_values();
        Ok(if cursor.reverse {
            entries.rev().collect()
        } else {
            entries.collect()
        })
    }

    fn commit(&self) -> Result<()> {
        let mut buffer = self.active()?;
        if self.shared.ensure_open().is_err() {
            buffer.discard(TransactionState::RolledBack);
            return Err(Error::AlreadyClosed);
        }
        if buffer.writes.is_empty() {
            buffer.discard(TransactionState::Committed);
            return Ok(());
        }

        let now = Instant::now();
        let mut tables = self.shared.tables.write();
        let conflict = buffer
            .reads
            .iter()
            .find(|(key, observed)| tables.live_version(key, now) != **observed)
            .map(|(key, _)| key.clone());
        if let Some(key) = conflict {
            drop(tables);
            buffer.discard(TransactionState::RolledBack);
            warn!(
                tx = %self.id,
                key = %crate::ops::display_key(&key),
                "Transaction conflict, rolled back"
            );
            return Err(Error::ConcurrentTransaction);
        }

        let writes = std::mem::take(&mut buffer.writes);
        let count = writes.len();
        for (key, pending) in writes {
            match pending {
                Pending::Put {
                    value, expires_at, ..
                } => {
                    tables.put(&key, value, expires_at);
                },
                Pending::Touch { expires_at } => {
                    tables.touch(&key, expires_at, now);
                },
                Pending::Delete => {
                    tables.remove(&key);
                },
            }
        }
        drop(tables);
        buffer.discard(TransactionState::Committed);
        debug!(tx = %self.id, writes = count, "Transaction committed");
        Ok(())
    }

    fn rollback(&self) {
        let mut buffer = self.buffer.lock();
        if !buffer.state.is_terminal() {
            buffer.discard(TransactionState::RolledBack);
            debug!(tx = %self.id, "Transaction rolled back");
        }
    }
}

/// Handle stored in the context for a memory transaction.
pub(crate) struct MemoryTransaction {
    state: Arc<TxnState>,
}

impl MemoryTransaction {
    pub(super) fn begin(shared: Arc<Shared>, read_only: bool) -> Self {
        Self {
            state: Arc::new(TxnState {
                id: Uuid::new_v4().to_string(),
                read_only,
                shared,
                buffer: Mutex::new(Buffer {
                    state: TransactionState::Active,
                    reads: HashMap::new(),
                    writes: BTreeMap::new(),
                    puts: 0,
                }),
            }),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn read_only(&self) -> bool {
        self.state.read_only
    }

    fn state(&self) -> TransactionState {
        self.state.buffer.lock().state
    }

    async fn commit(&self) -> Result<()> {
        self.state.commit()
    }

    fn rollback(&self) {
        self.state.rollback();
    }

    fn instance(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.state) as Arc<dyn Any + Send + Sync>
    }
}
