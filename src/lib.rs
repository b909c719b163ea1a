// ============================================================================
// doclock: optimistic locking for schemaless document stores
// ============================================================================

pub mod config;
pub mod core;
pub mod facade;
pub mod locking;
pub mod prelude;
pub mod registry;
pub mod selector;
pub mod storage;
pub mod update;

// Re-export main types for convenience
pub use config::{DEFAULT_VERSION_FIELD, LockingConfig, RetryPolicy};
pub use core::{Document, ID_FIELD, Identity, LockError, Result};
pub use facade::Database;
pub use locking::{
    Collection, ConditionalUpdateExecutor, ConflictDetector, EmbeddedEntity, Entity, RootRef,
    RootResolver, WriteMode, with_retry, with_retry_reloading,
};
pub use registry::{EmbeddedIn, EntityKind, EntityType, LockingMode, TypeRegistry};
pub use selector::{Filter, Selector, SelectorBuilder};
pub use storage::{InMemoryDocumentStore, StorageAdapter};
pub use update::{
    AtomicUpdateBatch, BitwiseOp, ComposedUpdate, PopEnd, UnsetArgs, UpdateComposer,
    UpdateOperation, UpdateOperator,
};
