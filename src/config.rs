//! Store configuration.
//!
//! [`StoreConfig`] is injected at store construction and read by the
//! operation builders (default batch size, key limits) and by engines
//! (transaction limits, retry policy). It can be built in code or loaded
//! from TOML:
//!
//! ```toml
//! name = "sessions"
//! default_batch_size = 512
//! max_transaction_writes = 1000
//!
//! [retry]
//! max_retries = 5
//! initial_delay_ms = 20
//! ```
//!
//! Missing fields fall back to the defaults in [`crate::constants`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::constants;
use crate::error::Error;
use crate::retry::RetryConfig;

/// Configuration shared by a store and the operations issued against it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Logical store name; the key under which ambient transactions are
    /// attached to a context.
    pub name: String,
    /// Page size used by enumeration when the caller sets none.
    pub default_batch_size: usize,
    /// Maximum pending writes in one transaction.
    pub max_transaction_writes: usize,
    /// Maximum key length in bytes.
    pub max_key_size: usize,
    /// Backoff policy for [`crate::retry::retry_transaction`].
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_STORE_NAME.to_string(),
            default_batch_size: constants::DEFAULT_BATCH_SIZE,
            max_transaction_writes: constants::DEFAULT_MAX_TRANSACTION_WRITES,
            max_key_size: constants::DEFAULT_MAX_KEY_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration with the given logical name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the default enumeration batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    /// Set the transaction write limit.
    #[must_use]
    pub fn with_max_transaction_writes(mut self, limit: usize) -> Self {
        self.max_transaction_writes = limit;
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - A field has an invalid type
    /// - The resulting configuration fails [`StoreConfig::validate`]
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content).context("Invalid store configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no store can operate with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty name or a zero
    /// batch size, transaction limit or key size.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::invalid_request("store name cannot be empty"));
        }
        if self.default_batch_size == 0 {
            return Err(Error::invalid_request("default_batch_size must be positive"));
        }
        if self.max_transaction_writes == 0 {
            return Err(Error::invalid_request(
                "max_transaction_writes must be positive",
            ));
        }
        if self.max_key_size == 0 {
            return Err(Error::invalid_request("max_key_size must be positive"));
        }
        Ok(())
    }
}
