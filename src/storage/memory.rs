use super::StorageAdapter;
use crate::core::{Document, ID_FIELD, Identity, LockError, Result};
use crate::selector::{Filter, Selector};
use crate::update::{AtomicUpdateBatch, apply_batch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Document store kept in process memory.
///
/// Each write holds the collection lock for its whole match-then-mutate step,
/// which gives the same compare-and-swap behavior a real store provides for a
/// filtered update.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    writes: AtomicU64,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of update calls issued so far (single and bulk).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw stored document, bypassing any entity handle.
    pub async fn document(&self, collection: &str, identity: &Identity) -> Option<Document> {
        let filter = Filter::by_identity(identity);
        self.collections
            .read()
            .await
            .get(collection)?
            .iter()
            .find(|doc| filter.matches(doc))
            .cloned()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Removes every document of `collection`.
    pub async fn clear(&self, collection: &str) {
        self.collections.write().await.remove(collection);
    }
}

#[async_trait]
impl StorageAdapter for InMemoryDocumentStore {
    async fn execute_conditional_update(
        &self,
        collection: &str,
        selector: &Selector,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let filter = selector.to_filter();
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let Some(document) = documents.iter_mut().find(|doc| filter.matches(doc)) else {
            return Ok(0);
        };

        let mut updated = document.clone();
        apply_batch(&mut updated, batch)?;
        *document = updated;
        Ok(1)
    }

    async fn execute_bulk_update(
        &self,
        collection: &str,
        filter: &Filter,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut staged = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if filter.matches(document) {
                let mut updated = document.clone();
                apply_batch(&mut updated, batch)?;
                staged.push((index, updated));
            }
        }

        let matched = staged.len() as u64;
        for (index, updated) in staged {
            documents[index] = updated;
        }
        Ok(matched)
    }

    async fn reload(&self, collection: &str, selector: &Selector) -> Result<Option<Document>> {
        let filter = selector.to_filter();
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.iter().find(|doc| filter.matches(doc)))
            .cloned())
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let identity = Identity::from_document(&document)?.ok_or_else(|| {
            LockError::Storage(format!("document without '{}' in '{}'", ID_FIELD, collection))
        })?;
        let filter = Filter::by_identity(&identity);

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|doc| filter.matches(doc)) {
            return Err(LockError::Storage(format!(
                "duplicate key '{}' in '{}'",
                identity, collection
            )));
        }
        documents.push(document);
        Ok(())
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
