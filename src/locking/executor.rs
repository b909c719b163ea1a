use crate::core::Result;
use crate::selector::{Filter, Selector};
use crate::storage::StorageAdapter;
use crate::update::AtomicUpdateBatch;
use tracing::{Instrument, Level, event, info_span};

/// Issues one atomic write and reports the matched count. Never retries.
#[derive(Clone, Copy)]
pub struct ConditionalUpdateExecutor<'a> {
    store: &'a dyn StorageAdapter,
}

impl<'a> ConditionalUpdateExecutor<'a> {
    pub fn new(store: &'a dyn StorageAdapter) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        collection: &str,
        selector: &Selector,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64> {
        let span = info_span!(
            "locking.update_one",
            collection = %collection,
            identity = %selector.identity(),
            expected_version = ?selector.expected_version()
        );
        async {
            event!(Level::TRACE, update = %batch.to_document(), "conditional update");
            let matched = self
                .store
                .execute_conditional_update(collection, selector, batch)
                .await;
            match &matched {
                Ok(matched) => event!(Level::DEBUG, matched = *matched, "conditional update applied"),
                Err(err) => event!(Level::ERROR, error = %err, "conditional update failed"),
            }
            matched
        }
        .instrument(span)
        .await
    }

    pub async fn execute_bulk(
        &self,
        collection: &str,
        filter: &Filter,
        batch: &AtomicUpdateBatch,
    ) -> Result<u64> {
        let span = info_span!(
            "locking.update_many",
            collection = %collection,
            predicates = filter.predicates().len()
        );
        async {
            event!(Level::TRACE, update = %batch.to_document(), "bulk update");
            let matched = self.store.execute_bulk_update(collection, filter, batch).await;
            match &matched {
                Ok(matched) => event!(Level::DEBUG, matched = *matched, "bulk update applied"),
                Err(err) => event!(Level::ERROR, error = %err, "bulk update failed"),
            }
            matched
        }
        .instrument(span)
        .await
    }
}
