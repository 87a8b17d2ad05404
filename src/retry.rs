//! Retrying transactional units of work with exponential backoff.
//!
//! Optimistic transactions fail with [`Error::ConcurrentTransaction`] when
//! another writer committed first. That failure is safe to retry from
//! scratch, which is what [`retry_transaction`] does.
//!
//! # Example
//!
//! ```rust,ignore
//! use kvdeck::retry::retry_transaction;
//!
//! let balance = retry_transaction(&store, &ctx, false, |tx_ctx| {
//!     let store = store.clone();
//!     async move {
//!         let current = store.get(&tx_ctx).by_key("balance").to_counter().await?;
//!         store.set(&tx_ctx).by_key("balance").counter(current + 10).await?;
//!         Ok(current + 10)
//!     }
//! })
//! .await?;
//! ```

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{DataStore, TransactionalManager};
use crate::transaction::finish_transaction;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 10,
            max_delay_ms: 500,
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build the exponential backoff strategy.
    fn build_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries as usize)
            .with_factor(self.factor)
            .with_jitter()
    }
}

/// Run `work` inside a fresh transaction, retrying on conflicts.
///
/// Each attempt begins a transaction on `store`, hands the derived context
/// to `work`, and ends the transaction with the outcome: commit on success,
/// rollback on failure. Attempts that fail with
/// [`Error::ConcurrentTransaction`] (from `work` itself or from the commit)
/// are retried with the backoff from the store's [`RetryConfig`]; any other
/// error is returned immediately.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-retryable error.
pub async fn retry_transaction<S, F, Fut, T>(
    store: &S,
    ctx: &Context,
    read_only: bool,
    work: F,
) -> Result<T>
where
    S: DataStore + TransactionalManager + ?Sized,
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let config = store.config().retry.clone();
    let max_retries = config.max_retries;
    let name = store.name().to_string();

    let work = &work;
    let attempt_once = move || async move {
        let tx_ctx = store.begin_transaction(ctx, read_only).await?;
        let outcome = work(tx_ctx.clone()).await;
        finish_transaction(store, &tx_ctx, outcome).await
    };

    let mut attempt = 0u32;
    let notify = |err: &Error, dur: Duration| {
        attempt += 1;
        warn!(
            store = %name,
            attempt = attempt,
            max_retries = max_retries,
            next_delay_ms = dur.as_millis() as u64,
            error = %err,
            "Transaction conflicted, will retry"
        );
    };

    attempt_once
        .retry(config.build_backoff())
        .when(Error::is_retryable)
        .notify(notify)
        .await
}
