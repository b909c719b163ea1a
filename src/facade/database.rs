use crate::config::{LockingConfig, RetryPolicy};
use crate::core::{Document, LockError, Result};
use crate::locking::{Collection, EmbeddedEntity, Entity};
use crate::registry::{EntityType, TypeRegistry};
use crate::storage::{InMemoryDocumentStore, StorageAdapter};
use log::info;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A store plus the entity types registered against it.
///
/// # Examples
///
/// ```
/// use doclock::{Database, EntityType};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let db = Database::in_memory();
/// let people = db
///     .register(EntityType::root("person").collection("people").optimistic())
///     .unwrap();
///
/// let fields = json!({ "name": "John" }).as_object().cloned().unwrap();
/// let mut person = people.create(fields).await.unwrap();
/// assert_eq!(person.version(), 0);
///
/// person.set_attr("name", "Paul").unwrap();
/// person.save().await.unwrap();
/// assert_eq!(person.version(), 1);
/// # });
/// ```
pub struct Database {
    store: Arc<dyn StorageAdapter>,
    registry: TypeRegistry,
}

impl Database {
    pub fn new(store: Arc<dyn StorageAdapter>, config: LockingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            registry: TypeRegistry::new(config),
        })
    }

    /// Fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryDocumentStore::new()),
            registry: TypeRegistry::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn StorageAdapter> {
        &self.store
    }

    pub fn config(&self) -> &LockingConfig {
        self.registry.config()
    }

    /// Retry policy used by [`Database::with_locking`].
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.registry.config().retry
    }

    /// Registers a root type and returns its collection.
    pub fn register(&self, entity_type: EntityType) -> Result<Collection> {
        if entity_type.is_embedded() {
            return Err(LockError::InvalidOperation(format!(
                "'{}' is embedded; register it with register_embedded",
                entity_type.name()
            )));
        }
        let entity_type = self.registry.register(entity_type)?;
        info!(
            "registered {} on '{}' (locked: {}, version field: {})",
            entity_type.name(),
            entity_type.collection_name(),
            entity_type.participates(),
            entity_type.version_field_name()
        );
        Collection::new(Arc::clone(&self.store), entity_type)
    }

    /// Registers an embedded type; its root must already be registered.
    pub fn register_embedded(&self, entity_type: EntityType) -> Result<Arc<EntityType>> {
        let entity_type = self.registry.register(entity_type)?;
        info!(
            "registered embedded {} under {}",
            entity_type.name(),
            self.registry.root_of(&entity_type)?.name()
        );
        Ok(entity_type)
    }

    pub fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.registry.get(name)
    }

    pub fn collection(&self, name: &str) -> Result<Collection> {
        Collection::new(Arc::clone(&self.store), self.registry.get(name)?)
    }

    /// Unbound embedded child of the registered type `name`.
    pub fn embedded(&self, name: &str, fields: Document) -> Result<EmbeddedEntity> {
        EmbeddedEntity::new(self.registry.get(name)?, fields)
    }

    /// Runs `operation` on `entity` with the configured retry policy.
    pub async fn with_locking<T, F>(&self, entity: &mut Entity, operation: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut Entity) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let policy = self.retry_policy().clone();
        entity.with_locking_policy(&policy, operation).await
    }
}
