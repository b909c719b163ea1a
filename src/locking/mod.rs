//! Optimistic locking over conditional document writes.
//!
//! Every write on a locked root goes out as "update where `_id` and version
//! match" together with a version increment. A zero match count on a targeted
//! write means another writer got there first and surfaces as
//! [`LockError::Stale`](crate::core::LockError::Stale).

pub mod collection;
pub mod conflict;
pub mod embedded;
pub mod entity;
pub mod executor;
pub mod retry;

pub use collection::Collection;
pub use conflict::{ConflictDetector, WriteMode};
pub use embedded::{EmbeddedEntity, RootRef, RootResolver};
pub use entity::Entity;
pub use executor::ConditionalUpdateExecutor;
pub use retry::{with_retry, with_retry_reloading};
