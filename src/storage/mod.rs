pub mod adapter;
pub mod memory;

pub use adapter::StorageAdapter;
pub use memory::InMemoryDocumentStore;
