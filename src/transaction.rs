//! Transaction state machine, nested transactions and helpers shared by
//! transactional engines.
//!
//! ```text
//! Active ──commit──▶ Committed
//!    │
//!    └──rollback──▶ RolledBack
//! ```
//!
//! Both end states are terminal: using the transaction afterwards fails
//! with [`Error::DiscardedTransaction`].

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::{Transaction, TransactionalManager};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Open; writes are pending.
    Active,
    /// Terminal; writes are durable.
    Committed,
    /// Terminal; writes were discarded.
    RolledBack,
}

impl TransactionState {
    /// Returns true for `Committed` and `RolledBack`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Fails with [`Error::DiscardedTransaction`] unless `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DiscardedTransaction`] for terminal states.
    pub fn ensure_active(self) -> Result<()> {
        if self.is_terminal() {
            Err(Error::DiscardedTransaction)
        } else {
            Ok(())
        }
    }
}

/// A nested transaction scope that defers to its parent.
///
/// `commit` and `rollback` do nothing: whoever opened the parent decides
/// its fate. `read_only`, `state` and `instance` forward to the parent, so
/// engines operate on the parent's physical transaction.
pub struct InnerTransaction {
    parent: Arc<dyn Transaction>,
}

impl InnerTransaction {
    /// Wrap `parent`.
    #[must_use]
    pub fn new(parent: Arc<dyn Transaction>) -> Self {
        Self { parent }
    }

    /// The transaction this scope defers to.
    #[must_use]
    pub fn parent(&self) -> &Arc<dyn Transaction> {
        &self.parent
    }
}

#[async_trait]
impl Transaction for InnerTransaction {
    fn id(&self) -> &str {
        self.parent.id()
    }

    fn read_only(&self) -> bool {
        self.parent.read_only()
    }

    fn state(&self) -> TransactionState {
        self.parent.state()
    }

    async fn commit(&self) -> Result<()> {
        // parent commits
        Ok(())
    }

    fn rollback(&self) {
        // parent rolls back
    }

    fn instance(&self) -> Arc<dyn Any + Send + Sync> {
        self.parent.instance()
    }
}

/// Open a nested scope over an active ambient transaction, if `ctx` carries
/// one for `name`.
///
/// Returns `Ok(None)` when there is no usable parent and the engine should
/// start a physical transaction.
///
/// # Errors
///
/// Returns [`Error::ReadOnlyTransaction`] when a writable scope is
/// requested inside a read-only one.
pub fn nest_transaction(ctx: &Context, name: &str, read_only: bool) -> Result<Option<Context>> {
    let Some(parent) = ctx.transaction(name) else {
        return Ok(None);
    };
    if parent.state().is_terminal() {
        return Ok(None);
    }
    if parent.read_only() && !read_only {
        return Err(Error::ReadOnlyTransaction);
    }
    debug!(store = name, tx = parent.id(), "Joining ambient transaction");
    let inner: Arc<dyn Transaction> = Arc::new(InnerTransaction::new(parent));
    Ok(Some(ctx.with_transaction(name, inner)))
}

/// Commit or roll back the transaction that `ctx` carries for `name`.
///
/// This is the engine-independent body of
/// [`TransactionalManager::end_transaction`]:
///
/// - `outcome == None`: commit and return the commit's result. A context
///   that is already canceled or past its deadline rolls back instead and
///   yields [`Error::CanceledTransaction`].
/// - `outcome == Some(err)`: roll back and return `err` unchanged.
///
/// # Errors
///
/// Returns the commit failure, the original error, or
/// [`Error::InvalidRequest`] when `ctx` has no transaction for `name`.
pub async fn end_transaction(name: &str, ctx: &Context, outcome: Option<Error>) -> Result<()> {
    let Some(tx) = ctx.transaction(name) else {
        return Err(outcome.unwrap_or_else(|| {
            Error::invalid_request(format!("no transaction for store '{name}' in context"))
        }));
    };

    match outcome {
        None => {
            if ctx.is_done() {
                debug!(store = name, tx = tx.id(), "Context done, rolling back");
                tx.rollback();
                return Err(Error::CanceledTransaction);
            }
            tx.commit().await
        },
        Some(err) => {
            debug!(store = name, tx = tx.id(), error = %err, "Rolling back transaction");
            tx.rollback();
            Err(err)
        },
    }
}

/// End the transaction in `ctx` according to `outcome` and pass the value
/// through.
///
/// # Errors
///
/// Returns the commit failure, or the error carried by `outcome`.
pub async fn finish_transaction<M, T>(manager: &M, ctx: &Context, outcome: Result<T>) -> Result<T>
where
    M: TransactionalManager + ?Sized,
{
    match outcome {
        Ok(value) => {
            manager.end_transaction(ctx, None).await?;
            Ok(value)
        },
        Err(err) => match manager.end_transaction(ctx, Some(err)).await {
            Err(err) => Err(err),
            Ok(()) => Err(Error::internal("rollback did not report the failed outcome")),
        },
    }
}
