//! Operation builders.
//!
//! One builder per verb. A builder borrows the store and the request
//! context, collects its configuration through chained setters, and is
//! consumed by a terminal call that validates the key, encodes the payload,
//! dispatches exactly one raw call and decodes the result.
//!
//! ```ignore
//! let applied = store
//!     .compare_and_set(&ctx)
//!     .by_key(format_args!("lock:{}", job_id))
//!     .with_version(0)
//!     .with_ttl(30)
//!     .string(owner)
//!     .await?;
//! ```

mod compare_and_set;
mod enumerate;
mod get;
mod increment;
mod key;
mod remove;
mod set;
mod touch;

pub use compare_and_set::CompareAndSetOperation;
pub use enumerate::EnumerateOperation;
pub use get::GetOperation;
pub use increment::IncrementOperation;
pub use key::{display_key, validate_key};
pub use remove::RemoveOperation;
pub use set::SetOperation;
pub use touch::TouchOperation;
