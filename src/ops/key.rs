//! Key helpers shared by the builders.

use std::borrow::Cow;
use std::fmt::Display;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Rejects keys no engine should see.
///
/// # Errors
///
/// Returns [`Error::EmptyKey`] for a zero-length key and
/// [`Error::InvalidKey`] for one longer than `config.max_key_size`.
pub fn validate_key(key: &[u8], config: &StoreConfig) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    if key.len() > config.max_key_size {
        return Err(Error::InvalidKey);
    }
    Ok(())
}

/// Lossy UTF-8 rendering of a key for log fields.
#[must_use]
pub fn display_key(key: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(key)
}

/// Render a formatted key (`&str`, `String`, `format_args!`, ...) to bytes.
pub(crate) fn format_key(key: impl Display) -> Vec<u8> {
    key.to_string().into_bytes()
}
