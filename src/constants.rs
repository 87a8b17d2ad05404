//! Shared constants and defaults.

/// TTL marker meaning "no expiration".
pub const NO_TTL: u64 = 0;

/// Longest TTL an engine honours, in seconds (100 years); longer TTLs
/// are clamped to it.
pub const MAX_TTL: u64 = 100 * 365 * 24 * 60 * 60;

/// Default page size for enumeration when the caller sets none.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Default cap on pending writes inside one transaction.
pub const DEFAULT_MAX_TRANSACTION_WRITES: usize = 10_000;

/// Default upper bound on key length in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 64 * 1024;

/// Default logical store name.
pub const DEFAULT_STORE_NAME: &str = "store";

/// Encoded size of a counter value (big-endian `u64`).
pub const COUNTER_SIZE: usize = 8;
