//! Reference engines and the scan machinery they share.
//!
//! - **MemoryStore**: ordered in-memory engine with optimistic transactions
//!   (ideal for testing/embedding)
//! - **RedbStore**: persistent engine on redb with ACID single-operation writes
//!
//! Both page through key ranges with [`ScanCursor`] and hand entries to the
//! caller one at a time through [`drive_scan`].

mod backup;
pub mod memory;
pub mod redb;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;

use std::future::Future;
use std::ops::Bound;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::codec::{decode_counter, encode_counter};
use crate::context::Context;
use crate::entry::RawEntry;
use crate::error::{Error, Result};
use crate::store::EnumerateRequest;

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when no such key exists (empty or all-`0xFF` prefix).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Key range still to be scanned, narrowed after each page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanCursor {
    pub lower: Bound<Vec<u8>>,
    pub upper: Bound<Vec<u8>>,
    pub reverse: bool,
    pub limit: usize,
    pub only_keys: bool,
}

impl ScanCursor {
    pub fn new(request: &EnumerateRequest) -> Self {
        let prefix = &request.prefix;
        let end = prefix_successor(prefix).map_or(Bound::Unbounded, Bound::Excluded);
        let (lower, upper) = if request.reverse {
            // a seek sorting before the prefix leaves nothing below it
            let inside = request.seek.starts_with(prefix) && request.seek != *prefix;
            let upper = if inside || request.seek < *prefix {
                Bound::Included(request.seek.clone())
            } else {
                end
            };
            (Bound::Included(prefix.clone()), upper)
        } else {
            let start = if request.seek > *prefix {
                request.seek.clone()
            } else {
                prefix.clone()
            };
            (Bound::Included(start), end)
        };
        Self {
            lower,
            upper,
            reverse: request.reverse,
            limit: request.batch_size.max(1),
            only_keys: request.only_keys,
        }
    }

    /// Borrowed bounds for range queries.
    pub fn bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (
            self.lower.as_ref().map(Vec::as_slice),
            self.upper.as_ref().map(Vec::as_slice),
        )
    }

    /// True when no key can satisfy both bounds.
    ///
    /// Range queries on ordered maps panic on inverted bounds, so engines
    /// check this first.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) => {
                lo >= hi
            },
            _ => false,
        }
    }

    /// Continue past `last_key` in scan direction.
    pub fn advance(&mut self, last_key: Vec<u8>) {
        if self.reverse {
            self.upper = Bound::Excluded(last_key);
        } else {
            self.lower = Bound::Excluded(last_key);
        }
    }
}

/// One page of a scan.
#[derive(Debug, Default)]
pub(crate) struct ScanPage {
    /// Live entries in scan order.
    pub entries: Vec<RawEntry>,
    /// Last key examined, live or expired.
    pub last_key: Option<Vec<u8>>,
    /// Fewer rows than the limit were examined; the range is done.
    pub exhausted: bool,
}

/// Drive a paginated scan, feeding entries to `callback` one at a time.
///
/// `fetch` loads the next page for a cursor. The context is checked before
/// every page and every callback, and entries outside the prefix are dropped
/// even if an engine returned them.
pub(crate) async fn drive_scan<F, Fut>(
    ctx: &Context,
    request: &EnumerateRequest,
    mut fetch: F,
    callback: &mut (dyn FnMut(RawEntry) -> bool + Send),
) -> Result<()>
where
    F: FnMut(ScanCursor) -> Fut + Send,
    Fut: Future<Output = Result<ScanPage>> + Send,
{
    let mut cursor = ScanCursor::new(request);
    loop {
        ctx.check()?;
        if cursor.is_empty() {
            return Ok(());
        }
        let page = fetch(cursor.clone()).await?;
        for entry in page.entries {
            if !entry.key.starts_with(&request.prefix) {
                continue;
            }
            ctx.check()?;
            if !callback(entry) {
                return Ok(());
            }
        }
        match page.last_key {
            Some(last_key) if !page.exhausted => cursor.advance(last_key),
            _ => return Ok(()),
        }
    }
}

/// Counter arithmetic shared by engines.
///
/// Returns `(previous, encoded next value)`. An absent value is seeded with
/// `initial`, which is reported as the previous value. Present values
/// shorter than 8 bytes count as `0`. Addition wraps.
pub(crate) fn apply_increment(current: Option<&[u8]>, initial: i64, delta: i64) -> (i64, Vec<u8>) {
    let previous = match current {
        Some(bytes) => decode_counter(bytes).unwrap_or(0) as i64,
        None => initial,
    };
    let next = previous.wrapping_add(delta);
    (previous, encode_counter(next as u64))
}

/// Validate a compaction discard ratio.
pub(crate) fn check_discard_ratio(discard_ratio: f64) -> Result<()> {
    if discard_ratio > 0.0 && discard_ratio < 1.0 {
        Ok(())
    } else {
        Err(Error::invalid_request(format!(
            "discard ratio must be between 0 and 1, got {discard_ratio}"
        )))
    }
}

/// Whole seconds left, rounded up so a live entry never reports `0`.
pub(crate) fn ceil_secs(remaining: Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

/// Milliseconds since the unix epoch.
pub(crate) fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests;
