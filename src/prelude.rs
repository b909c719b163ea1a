//! Everything an application needs to declare types and write documents.
//!
//! `use doclock::prelude::*;` pulls in the facade, entity handles and the
//! operator vocabulary. Storage-level pieces stay under [`crate::storage`].

pub use crate::{
    Collection, Database, Document, EmbeddedEntity, Entity, EntityType, Filter, Identity,
    LockError, LockingConfig, LockingMode, Result, RetryPolicy, UnsetArgs, UpdateOperation,
    UpdateOperator,
};
