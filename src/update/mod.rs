//! Partial-update operators and their composition into atomic batches.

pub mod apply;
pub mod batch;
pub mod composer;
pub mod operator;

pub use apply::{apply_batch, apply_operation};
pub use batch::AtomicUpdateBatch;
pub use composer::{ComposedUpdate, UnsetArgs, UpdateComposer};
pub use operator::{BitwiseOp, PopEnd, UpdateOperation, UpdateOperator};
