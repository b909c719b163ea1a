//! Embedded children: every mutation is written against the owning root and
//! bumps the root's version. Children never carry a version of their own.

use crate::core::{Document, ID_FIELD, Identity, LockError, Result};
use crate::locking::Entity;
use crate::registry::{EmbeddedIn, EntityType};
use crate::update::{UpdateComposer, UpdateOperation, UpdateOperator};
use serde_json::Value;
use std::sync::Arc;

/// Back-reference from a child to its root: identifies the root, never owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRef {
    pub entity_type: String,
    pub identity: Identity,
}

impl RootRef {
    pub fn of(root: &Entity) -> Self {
        Self {
            entity_type: root.entity_type().name().to_string(),
            identity: root.identity().clone(),
        }
    }
}

/// A sub-document stored inside a root document.
#[derive(Debug, Clone)]
pub struct EmbeddedEntity {
    entity_type: Arc<EntityType>,
    identity: Identity,
    attributes: Document,
    relation: EmbeddedIn,
    root: Option<RootRef>,
    persisted: bool,
}

impl EmbeddedEntity {
    /// Unbound child; bind it with [`Self::bind`] before writing it.
    pub fn new(entity_type: Arc<EntityType>, mut fields: Document) -> Result<Self> {
        let relation = entity_type.embedded_in().cloned().ok_or_else(|| {
            LockError::InvalidOperation(format!("'{}' is not an embedded type", entity_type.name()))
        })?;
        let identity = match Identity::from_document(&fields)? {
            Some(identity) => identity,
            None => {
                let identity = Identity::generate();
                fields.insert(ID_FIELD.to_string(), identity.to_value());
                identity
            }
        };
        Ok(Self {
            entity_type,
            identity,
            attributes: fields,
            relation,
            root: None,
            persisted: false,
        })
    }

    /// Child bound to `root`.
    pub fn new_in(entity_type: Arc<EntityType>, fields: Document, root: &Entity) -> Result<Self> {
        let mut child = Self::new(entity_type, fields)?;
        child.bind(root);
        Ok(child)
    }

    pub fn bind(&mut self, root: &Entity) {
        self.root = Some(RootRef::of(root));
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn root(&self) -> Option<&RootRef> {
        self.root.as_ref()
    }

    pub fn attributes(&self) -> &Document {
        &self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        crate::core::lookup_path(&self.attributes, field)
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn relation(&self) -> &EmbeddedIn {
        &self.relation
    }
}

/// Routes child mutations to the owning root's document and version.
pub struct RootResolver<'a> {
    root: &'a mut Entity,
}

impl<'a> RootResolver<'a> {
    pub fn new(root: &'a mut Entity) -> Self {
        Self { root }
    }

    /// Children of `child_type` currently held by the root, bound to it.
    pub fn children(&self, child_type: &Arc<EntityType>) -> Result<Vec<EmbeddedEntity>> {
        let embedded = child_type.embedded_in().ok_or_else(|| {
            LockError::InvalidOperation(format!("'{}' is not an embedded type", child_type.name()))
        })?;
        let values = match self.root.get(&embedded.relation) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        };

        values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(fields) => Some(fields),
                _ => None,
            })
            .map(|fields| {
                let mut child = EmbeddedEntity::new(Arc::clone(child_type), fields)?;
                child.bind(&*self.root);
                child.persisted = true;
                Ok(child)
            })
            .collect()
    }

    /// Adds `child` to the root. An unsaved root is inserted whole, child included.
    pub async fn insert(&mut self, child: &mut EmbeddedEntity) -> Result<()> {
        self.resolve(child)?;
        if child.persisted {
            return Err(LockError::InvalidOperation(format!(
                "embedded {} '{}' is already stored",
                child.entity_type.name(),
                child.identity
            )));
        }
        let relation = &child.relation.relation;
        let payload = Value::Object(child.attributes.clone());
        let operation = if child.relation.many {
            UpdateOperation::push(relation, payload)
        } else {
            UpdateOperation::set(relation, payload)
        };
        let mut composer = UpdateComposer::for_type(self.root.entity_type());
        composer.add(operation)?;

        if self.root.is_persisted() {
            self.commit(composer, None).await?;
        } else {
            self.root.apply_composed(composer).await?;
            self.root.insert().await?;
        }
        child.persisted = true;
        Ok(())
    }

    /// Sets `fields` on a child already stored in the root.
    pub async fn update(&mut self, child: &mut EmbeddedEntity, fields: Document) -> Result<()> {
        self.apply(child, UpdateOperator::Set, fields).await
    }

    /// Runs `operator` over the child's `fields`, addressed through the root.
    pub async fn apply(
        &mut self,
        child: &mut EmbeddedEntity,
        operator: UpdateOperator,
        fields: Document,
    ) -> Result<()> {
        self.resolve(child)?;
        let prefix = self.child_path(child)?;

        let mut composer = UpdateComposer::for_type(self.root.entity_type());
        for (field, value) in fields {
            if field == ID_FIELD {
                return Err(LockError::InvalidOperation(format!(
                    "'{}' of embedded {} cannot change",
                    ID_FIELD,
                    child.entity_type.name()
                )));
            }
            let path = format!("{}.{}", prefix, field);
            if operator == UpdateOperator::Unset {
                composer.unset(path)?;
            } else {
                let value = match (operator, value) {
                    (UpdateOperator::Rename, Value::String(to)) => {
                        Value::String(format!("{}.{}", prefix, to))
                    }
                    (_, value) => value,
                };
                composer.accumulate(operator, &path, value)?;
            }
        }
        let guard = self.position_guard(child, &prefix);
        self.commit(composer, guard).await?;
        child.attributes = self.stored_child(child)?;
        Ok(())
    }

    /// Removes `child` from the root.
    pub async fn remove(&mut self, child: &mut EmbeddedEntity) -> Result<()> {
        self.resolve(child)?;
        let relation = &child.relation;
        let mut composer = UpdateComposer::for_type(self.root.entity_type());
        let guard = if relation.many {
            let mut pattern = Document::new();
            pattern.insert(ID_FIELD.to_string(), child.identity.to_value());
            composer.add(UpdateOperation::pull(&relation.relation, Value::Object(pattern)))?;
            None
        } else {
            composer.unset(relation.relation.as_str())?;
            self.position_guard(child, &relation.relation)
        };
        self.commit(composer, guard).await?;
        child.persisted = false;
        Ok(())
    }

    /// Rebuilds the root's selector from its current version on every call.
    async fn commit(
        &mut self,
        composer: UpdateComposer,
        guard: Option<(String, Value)>,
    ) -> Result<()> {
        if !self.root.is_persisted() {
            return Err(LockError::InvalidOperation(format!(
                "root {} '{}' must be saved before its children change",
                self.root.entity_type().name(),
                self.root.identity()
            )));
        }
        let composed = self
            .root
            .store()
            .compose_update(composer, self.root.entity_type().participates());
        self.root.commit_guarded(composed, guard).await
    }

    fn resolve(&self, child: &EmbeddedEntity) -> Result<()> {
        let missing = || LockError::MissingParent {
            entity_type: child.entity_type.name().to_string(),
            identity: child.identity.clone(),
        };
        let root_ref = child.root.as_ref().ok_or_else(missing)?;
        let owner = &child.relation.root_type;
        if root_ref.identity != *self.root.identity()
            || root_ref.entity_type != self.root.entity_type().name()
            || owner != self.root.entity_type().name()
        {
            return Err(missing());
        }
        Ok(())
    }

    /// Path of the child inside the root document, e.g. `phones.1` or `address`.
    fn child_path(&self, child: &EmbeddedEntity) -> Result<String> {
        let relation = &child.relation;
        if !relation.many {
            return match self.root.get(&relation.relation) {
                Some(Value::Object(_)) => Ok(relation.relation.clone()),
                _ => Err(self.not_stored(child)),
            };
        }
        let position = match self.root.get(&relation.relation) {
            Some(Value::Array(items)) => items.iter().position(|item| {
                item.get(ID_FIELD) == Some(&child.identity.to_value())
            }),
            _ => None,
        };
        position
            .map(|index| format!("{}.{}", relation.relation, index))
            .ok_or_else(|| self.not_stored(child))
    }

    /// Requires the child to still sit at `path` when the write lands.
    /// Positions can shift under writers that skip the root's version.
    fn position_guard(&self, child: &EmbeddedEntity, path: &str) -> Option<(String, Value)> {
        let id_path = format!("{}.{}", path, ID_FIELD);
        let identity = child.identity.to_value();
        match self.root.get(&id_path) {
            Some(stored) if *stored == identity => Some((id_path, identity)),
            _ => None,
        }
    }

    fn stored_child(&self, child: &EmbeddedEntity) -> Result<Document> {
        let path = self.child_path(child)?;
        match self.root.get(&path) {
            Some(Value::Object(fields)) => Ok(fields.clone()),
            _ => Err(self.not_stored(child)),
        }
    }

    fn not_stored(&self, child: &EmbeddedEntity) -> LockError {
        LockError::DocumentNotFound {
            entity_type: child.entity_type.name().to_string(),
            identity: child.identity.clone(),
        }
    }
}

impl EmbeddedEntity {
    pub async fn insert(&mut self, root: &mut Entity) -> Result<()> {
        RootResolver::new(root).insert(self).await
    }

    pub async fn update(&mut self, root: &mut Entity, fields: Document) -> Result<()> {
        RootResolver::new(root).update(self, fields).await
    }

    pub async fn remove(&mut self, root: &mut Entity) -> Result<()> {
        RootResolver::new(root).remove(self).await
    }
}
