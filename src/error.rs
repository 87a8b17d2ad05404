//! Error taxonomy shared by every operation and engine.
//!
//! Each failure category is a distinct variant so callers can match on the
//! kind instead of parsing messages. Engines surface these unchanged; the
//! operation builders never recover from them.

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Key is absent (only reported for required reads and touch).
    #[error("not found")]
    NotFound,

    /// The request is malformed or not applicable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transaction conflicted with another transaction; safe to retry.
    #[error("concurrent transaction, try again")]
    ConcurrentTransaction,

    /// Mutating call issued inside a read-only transaction.
    #[error("read-only transaction has update operation")]
    ReadOnlyTransaction,

    /// Transaction was used after commit or rollback.
    #[error("transaction has been discarded")]
    DiscardedTransaction,

    /// Transaction was abandoned because its context was canceled.
    #[error("transaction has been canceled")]
    CanceledTransaction,

    /// Too many writes for a single transaction.
    #[error("transaction is too big")]
    TransactionTooLarge,

    /// Zero-length key.
    #[error("empty key")]
    EmptyKey,

    /// Key rejected by the engine (for example, too long).
    #[error("key is invalid")]
    InvalidKey,

    /// Store has been closed.
    #[error("already closed")]
    AlreadyClosed,

    /// Engine-internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Request context was canceled.
    #[error("context canceled")]
    Canceled,

    /// Request context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Structured message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Backup or restore stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Create a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }

    /// Returns true if the failed unit of work may simply be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentTransaction)
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true for context cancellation or deadline expiry.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(Error::ConcurrentTransaction.is_retryable());
        assert!(!Error::ReadOnlyTransaction.is_retryable());
        assert!(!Error::NotFound.is_retryable());
        assert!(!Error::internal("boom").is_retryable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::EmptyKey.to_string(), "empty key");
        assert_eq!(
            Error::invalid_request("bad ratio").to_string(),
            "invalid request: bad ratio"
        );
        assert_eq!(
            Error::DiscardedTransaction.to_string(),
            "transaction has been discarded"
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::other("disk gone").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_canceled_kinds() {
        assert!(Error::Canceled.is_canceled());
        assert!(Error::DeadlineExceeded.is_canceled());
        assert!(!Error::CanceledTransaction.is_canceled());
    }
}
