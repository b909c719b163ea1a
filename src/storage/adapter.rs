use crate::core::{Document, Identity, Result};
use crate::registry::EntityType;
use crate::selector::{Filter, Selector, SelectorBuilder};
use crate::update::{AtomicUpdateBatch, ComposedUpdate, UpdateComposer};
use async_trait::async_trait;

/// Document-store client the locking engine writes through.
///
/// Implementations only provide the storage primitives; selector building and
/// update composition have defaults that every backend can share.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Predicate for the next write on `identity`.
    fn build_selector(
        &self,
        entity_type: &EntityType,
        identity: &Identity,
        version: Option<u64>,
        attributes: &Document,
        skip_version: bool,
    ) -> Selector {
        SelectorBuilder::new(entity_type).build(identity, version, attributes, skip_version)
    }

    /// Final batches for one write, version bump included when `participates`.
    fn compose_update(&self, composer: UpdateComposer, participates: bool) -> ComposedUpdate {
        composer.finalize(participates)
    }

    /// Atomically applies `batch` to at most one document matching `selector`.
    ///
    /// Returns the matched count (0 or 1).
    async fn execute_conditional_update(
        &self,
        collection: &str,
        selector: &Selector,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64>;

    /// Applies `batch` to every document matching `filter`; returns how many matched.
    async fn execute_bulk_update(
        &self,
        collection: &str,
        filter: &Filter,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64>;

    /// Point read by identity. Callers pass a selector built with `skip_version`.
    async fn reload(&self, collection: &str, selector: &Selector) -> Result<Option<Document>>;

    /// Inserts a new document; fails if the identity already exists.
    async fn insert(&self, collection: &str, document: Document) -> Result<()>;

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;
}
