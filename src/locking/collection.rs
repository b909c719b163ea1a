use crate::core::{Document, Identity, LockError, Result};
use crate::locking::{ConditionalUpdateExecutor, ConflictDetector, Entity};
use crate::registry::EntityType;
use crate::selector::Filter;
use crate::storage::StorageAdapter;
use crate::update::{BitwiseOp, UnsetArgs, UpdateComposer, UpdateOperator};
use log::debug;
use serde_json::{Value, json};
use std::sync::Arc;

/// Entry point for one root entity type: creation, lookup and bulk updates.
///
/// Bulk updates go to every document matching a filter in one engine call.
/// For locked types each call also increments the version of every matched
/// document; zero or partial matches are not conflicts.
#[derive(Clone)]
pub struct Collection {
    store: Arc<dyn StorageAdapter>,
    entity_type: Arc<EntityType>,
}

impl Collection {
    pub fn new(store: Arc<dyn StorageAdapter>, entity_type: Arc<EntityType>) -> Result<Self> {
        if entity_type.is_embedded() {
            return Err(LockError::InvalidOperation(format!(
                "'{}' is embedded; use its root's collection",
                entity_type.name()
            )));
        }
        Ok(Self { store, entity_type })
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn name(&self) -> &str {
        self.entity_type.collection_name()
    }

    /// Unsaved handle.
    pub fn build(&self, fields: Document) -> Result<Entity> {
        Entity::new(Arc::clone(&self.store), Arc::clone(&self.entity_type), fields)
    }

    /// Inserts a new document at version 0.
    pub async fn create(&self, fields: Document) -> Result<Entity> {
        let mut entity = self.build(fields)?;
        entity.insert().await?;
        Ok(entity)
    }

    pub async fn find(&self, identity: &Identity) -> Result<Entity> {
        let selector = self.store.build_selector(
            &self.entity_type,
            identity,
            None,
            &Document::new(),
            true,
        );
        let document = self
            .store
            .reload(self.name(), &selector)
            .await?
            .ok_or_else(|| LockError::DocumentNotFound {
                entity_type: self.entity_type.name().to_string(),
                identity: identity.clone(),
            })?;
        Entity::from_stored(Arc::clone(&self.store), Arc::clone(&self.entity_type), document)
    }

    pub async fn find_all(&self, filter: &Filter) -> Result<Vec<Entity>> {
        self.store
            .find_many(self.name(), filter)
            .await?
            .into_iter()
            .map(|document| {
                Entity::from_stored(Arc::clone(&self.store), Arc::clone(&self.entity_type), document)
            })
            .collect()
    }

    /// One operator over every document matching `filter`. Returns the matched count.
    pub async fn apply_bulk(
        &self,
        filter: &Filter,
        operator: UpdateOperator,
        fields: Document,
    ) -> Result<u64> {
        let mut composer = UpdateComposer::for_type(&self.entity_type);
        composer.accumulate_all(operator, fields)?;
        self.dispatch(filter, composer).await
    }

    /// Sends a prepared composition; the version bump is added per this type.
    pub async fn dispatch(&self, filter: &Filter, composer: UpdateComposer) -> Result<u64> {
        if composer.is_empty() {
            return Ok(0);
        }
        let participates = self.entity_type.participates();
        let composed = self.store.compose_update(composer, participates);
        let executor = ConditionalUpdateExecutor::new(self.store.as_ref());
        let detector = ConflictDetector::bulk(self.entity_type.name());

        let mut batches = composed.into_batches().into_iter();
        let primary = batches.next().unwrap_or_default();
        let matched = detector.interpret(executor.execute_bulk(self.name(), filter, &primary).await?)?;
        for batch in batches {
            detector.interpret(executor.execute_bulk(self.name(), filter, &batch).await?)?;
        }
        debug!(
            "bulk update on {} matched {} (locked: {})",
            self.name(),
            matched,
            participates
        );
        Ok(matched)
    }

    pub async fn set(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Set, fields).await
    }

    /// Accepts a field name, a list of names, or a mapping whose keys are unset.
    pub async fn unset(&self, filter: &Filter, fields: impl Into<UnsetArgs>) -> Result<u64> {
        let mut composer = UpdateComposer::for_type(&self.entity_type);
        composer.unset(fields)?;
        self.dispatch(filter, composer).await
    }

    pub async fn inc(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Increment, fields).await
    }

    pub async fn bit(&self, filter: &Filter, field: &str, op: BitwiseOp) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::BitwiseOp, single(field, json!(op)))
            .await
    }

    pub async fn push(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Push, fields).await
    }

    pub async fn push_all(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::PushEach, fields).await
    }

    pub async fn pull(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Pull, fields).await
    }

    pub async fn pull_all(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::PullAll, fields).await
    }

    pub async fn add_to_set(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::AddToSet, fields).await
    }

    pub async fn add_each_to_set(&self, filter: &Filter, fields: Document) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::AddToSetEach, fields).await
    }

    /// `1` pops the last element, `-1` the first.
    pub async fn pop(&self, filter: &Filter, field: &str, end: i64) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Pop, single(field, json!(end)))
            .await
    }

    pub async fn rename(&self, filter: &Filter, from: &str, to: &str) -> Result<u64> {
        self.apply_bulk(filter, UpdateOperator::Rename, single(from, json!(to)))
            .await
    }
}

fn single(field: &str, value: Value) -> Document {
    let mut document = Document::new();
    document.insert(field.to_string(), value);
    document
}
