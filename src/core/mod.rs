pub mod error;
pub mod types;

pub use error::{LockError, Result};
pub use types::{Document, ID_FIELD, Identity, lookup_path, paths_overlap};
