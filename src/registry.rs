//! Per-type locking configuration, resolved once at registration.

use crate::config::{LockingConfig, validate_version_field};
use crate::core::{LockError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Whether writes against a type are version-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingMode {
    Optimistic,
    Unlocked,
}

/// Where an embedded type lives inside its owning root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedIn {
    /// Registered name of the root type.
    pub root_type: String,
    /// Field of the root document that holds the child (or the child array).
    pub relation: String,
    /// `true` for an array of children, `false` for a single child.
    pub many: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Root,
    Embedded(EmbeddedIn),
}

/// Registration-time description of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    collection: String,
    locking: LockingMode,
    version_field: Option<String>,
    kind: EntityKind,
    shard_key: Option<String>,
}

impl EntityType {
    /// Top-level type stored in its own collection, unlocked until `optimistic()` is called.
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: name.to_string(),
            locking: LockingMode::Unlocked,
            version_field: None,
            kind: EntityKind::Root,
            shard_key: None,
        }
    }

    /// Child type stored as an array element under `relation` of `root_type`.
    pub fn embedded_many(name: &str, root_type: &str, relation: &str) -> Self {
        Self::embedded(name, root_type, relation, true)
    }

    /// Child type stored as a single sub-document under `relation` of `root_type`.
    pub fn embedded_one(name: &str, root_type: &str, relation: &str) -> Self {
        Self::embedded(name, root_type, relation, false)
    }

    fn embedded(name: &str, root_type: &str, relation: &str, many: bool) -> Self {
        Self {
            kind: EntityKind::Embedded(EmbeddedIn {
                root_type: root_type.to_string(),
                relation: relation.to_string(),
                many,
            }),
            ..Self::root(name)
        }
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    pub fn optimistic(mut self) -> Self {
        self.locking = LockingMode::Optimistic;
        self
    }

    pub fn locking(mut self, mode: LockingMode) -> Self {
        self.locking = mode;
        self
    }

    pub fn version_field(mut self, field: &str) -> Self {
        self.version_field = Some(field.to_string());
        self
    }

    pub fn shard_key(mut self, field: &str) -> Self {
        self.shard_key = Some(field.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn embedded_in(&self) -> Option<&EmbeddedIn> {
        match &self.kind {
            EntityKind::Embedded(embedded) => Some(embedded),
            EntityKind::Root => None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded_in().is_some()
    }

    pub fn shard_key_field(&self) -> Option<&str> {
        self.shard_key.as_deref()
    }

    /// Embedded types never carry their own version; their root does.
    pub fn participates(&self) -> bool {
        self.locking == LockingMode::Optimistic && !self.is_embedded()
    }

    pub fn version_field_name(&self) -> &str {
        self.version_field
            .as_deref()
            .unwrap_or(crate::config::DEFAULT_VERSION_FIELD)
    }
}

/// Registered entity types, keyed by name.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    config: LockingConfig,
    types: RwLock<HashMap<String, Arc<EntityType>>>,
}

impl TypeRegistry {
    pub fn new(config: LockingConfig) -> Self {
        Self {
            config,
            types: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LockingConfig {
        &self.config
    }

    /// Validates `entity_type`, fills in the default version field and stores it.
    pub fn register(&self, mut entity_type: EntityType) -> Result<Arc<EntityType>> {
        let mut types = self
            .types
            .write()
            .map_err(|err| LockError::Config(err.to_string()))?;

        if types.contains_key(&entity_type.name) {
            return Err(LockError::Config(format!(
                "entity type '{}' is already registered",
                entity_type.name
            )));
        }

        if let Some(embedded) = entity_type.embedded_in() {
            let root = types
                .get(&embedded.root_type)
                .ok_or_else(|| LockError::UnknownEntityType(embedded.root_type.clone()))?;
            if root.is_embedded() {
                return Err(LockError::Config(format!(
                    "'{}' is embedded and cannot own '{}'",
                    root.name, entity_type.name
                )));
            }
            entity_type.collection = root.collection.clone();
        }

        let version_field = entity_type
            .version_field
            .take()
            .unwrap_or_else(|| self.config.version_field.clone());
        validate_version_field(&version_field)?;
        entity_type.version_field = Some(version_field);

        let entity_type = Arc::new(entity_type);
        types.insert(entity_type.name.clone(), Arc::clone(&entity_type));
        Ok(entity_type)
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntityType>> {
        self.types
            .read()
            .map_err(|err| LockError::Config(err.to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| LockError::UnknownEntityType(name.to_string()))
    }

    /// Root type owning an embedded type.
    pub fn root_of(&self, entity_type: &EntityType) -> Result<Arc<EntityType>> {
        match entity_type.embedded_in() {
            Some(embedded) => self.get(&embedded.root_type),
            None => self.get(entity_type.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolves_default_version_field() {
        let registry = TypeRegistry::new(LockingConfig::new().version_field("rev"));
        let person = registry
            .register(EntityType::root("person").collection("people").optimistic())
            .unwrap();
        assert_eq!(person.version_field_name(), "rev");
        assert!(person.participates());

        let tag = registry
            .register(EntityType::root("tag").version_field("v"))
            .unwrap();
        assert_eq!(tag.version_field_name(), "v");
        assert!(!tag.participates());
    }

    #[test]
    fn embedded_types_share_root_collection_and_never_participate() {
        let registry = TypeRegistry::default();
        registry
            .register(EntityType::root("person").collection("people").optimistic())
            .unwrap();
        let phone = registry
            .register(EntityType::embedded_many("phone", "person", "phones").optimistic())
            .unwrap();

        assert_eq!(phone.collection_name(), "people");
        assert!(!phone.participates());
        assert_eq!(registry.root_of(&phone).unwrap().name(), "person");
    }

    #[test]
    fn embedded_type_requires_registered_root() {
        let registry = TypeRegistry::default();
        let err = registry
            .register(EntityType::embedded_one("address", "person", "address"))
            .unwrap_err();
        assert_eq!(err, LockError::UnknownEntityType("person".to_string()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = TypeRegistry::default();
        registry.register(EntityType::root("person")).unwrap();
        assert!(matches!(
            registry.register(EntityType::root("person")),
            Err(LockError::Config(_))
        ));
    }
}
