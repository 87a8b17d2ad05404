//! kvdeck: a storage-engine-agnostic key-value access layer.
//!
//! Callers compose requests through fluent operation builders, each of which
//! dispatches exactly one call to a [`DataStore`] engine:
//!
//! ```ignore
//! use kvdeck::{Context, DataStoreExt, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let ctx = Context::background();
//!
//! store.set(&ctx).by_key(format_args!("user:{}", 42)).with_ttl(60).string("alice").await?;
//! let name = store.get(&ctx).by_key("user:42").required().to_string().await?;
//!
//! let previous = store.increment(&ctx).by_key("visits").with_delta(1).run().await?;
//! ```
//!
//! Transactions travel inside the request [`Context`], keyed by the store's
//! logical name, so nested calls join the ambient transaction automatically:
//!
//! ```ignore
//! let tx_ctx = store.begin_transaction(&ctx, false).await?;
//! let outcome = transfer(&store, &tx_ctx).await;
//! store.end_transaction(&tx_ctx, outcome.err()).await?;
//! ```
//!
//! # Modules
//!
//! - [`store`] - Raw contract and capability traits engines implement
//! - [`ops`] - Operation builders (get, set, compare-and-set, ...)
//! - [`context`] - Request context with cancellation and ambient transactions
//! - [`transaction`] - Transaction state machine and nested transactions
//! - [`backends`] - In-memory and redb reference engines

pub mod backends;
pub mod codec;
pub mod config;
pub mod constants;
pub mod context;
pub mod entry;
pub mod error;
pub mod logging;
pub mod ops;
pub mod retry;
pub mod store;
pub mod transaction;

pub use backends::{MemoryStore, RedbStore};
pub use codec::{Json, Message};
pub use config::StoreConfig;
pub use context::{CancelHandle, Context, get_transaction, with_transaction};
pub use entry::{CounterEntry, MessageEntry, RawEntry};
pub use error::{Error, Result};
pub use store::{
    DataStore, DataStoreExt, DataStoreManager, EnumerateRequest, ManagedDataStore,
    ManagedTransactionalDataStore, Transaction, TransactionalDataStore, TransactionalManager,
};
pub use transaction::{InnerTransaction, TransactionState};
