//! Request-scoped context.
//!
//! A [`Context`] carries three things through a call chain:
//!
//! - a cancellation signal shared with every context derived from it,
//! - an optional deadline,
//! - the ambient transactions, keyed by the logical name of the store that
//!   created them.
//!
//! Contexts are immutable. Every `with_*` method returns a derived copy and
//! leaves the receiver untouched, so sibling call chains that derive from a
//! common ancestor get independent transaction scopes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::Transaction;

/// Request context: cancellation, deadline and ambient transactions.
#[derive(Clone, Default)]
pub struct Context {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    transactions: Arc<HashMap<String, Arc<dyn Transaction>>>,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`].
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    /// Cancel the associated context and every context derived from it.
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

impl Context {
    /// An empty context: never canceled, no deadline, no transactions.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can be canceled through the returned handle.
    ///
    /// Canceling the parent also cancels the derived context.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);
        let handle = CancelHandle(token.clone());
        let ctx = Self {
            cancel: Some(token),
            ..self.clone()
        };
        (ctx, handle)
    }

    /// Derive a context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with the given deadline.
    ///
    /// An existing earlier deadline wins.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once the context was canceled or its deadline passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Fails with [`Error::Canceled`] or [`Error::DeadlineExceeded`] once
    /// the context is done.
    ///
    /// # Errors
    ///
    /// Returns the cancellation kind that ended the context.
    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the context is canceled or its deadline passes.
    ///
    /// Never resolves for a context with neither.
    pub async fn done(&self) {
        let canceled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            () = canceled => {},
            () = expired => {},
        }
    }

    /// The ambient transaction attached for the store named `name`.
    #[must_use]
    pub fn transaction(&self, name: &str) -> Option<Arc<dyn Transaction>> {
        self.transactions.get(name).cloned()
    }

    /// Derive a context carrying `tx` as the ambient transaction of the
    /// store named `name`, replacing any previous one for that name.
    #[must_use]
    pub fn with_transaction(&self, name: &str, tx: Arc<dyn Transaction>) -> Self {
        let mut transactions = (*self.transactions).clone();
        transactions.insert(name.to_string(), tx);
        Self {
            transactions: Arc::new(transactions),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.transactions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Context")
            .field("canceled", &self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled))
            .field("deadline", &self.deadline)
            .field("transactions", &names)
            .finish()
    }
}

/// Gets the ambient transaction for the store named `name`.
///
/// Several stores may attach transactions to one context at the same time;
/// they are told apart by name.
#[must_use]
pub fn get_transaction(ctx: &Context, name: &str) -> Option<Arc<dyn Transaction>> {
    ctx.transaction(name)
}

/// Derives a context carrying `tx` for the store named `name`.
#[must_use]
pub fn with_transaction(ctx: &Context, name: &str, tx: Arc<dyn Transaction>) -> Context {
    ctx.with_transaction(name, tx)
}
