use crate::core::{Document, ID_FIELD, Identity, LockError, Result, lookup_path, paths_overlap};
use crate::locking::{ConditionalUpdateExecutor, ConflictDetector};
use crate::registry::EntityType;
use crate::storage::StorageAdapter;
use crate::update::{
    AtomicUpdateBatch, ComposedUpdate, UnsetArgs, UpdateComposer, UpdateOperation,
    UpdateOperator, apply_operation,
};
use log::debug;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Handle on one root document.
///
/// The version lives beside the attributes, never inside them, so it can
/// never show up as a pending change. Writes go out as conditional updates
/// guarded by the version this handle last saw.
#[derive(Clone)]
pub struct Entity {
    store: Arc<dyn StorageAdapter>,
    entity_type: Arc<EntityType>,
    identity: Identity,
    version: Option<u64>,
    attributes: Document,
    changes: BTreeSet<String>,
    persisted: bool,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.entity_type.name())
            .field("identity", &self.identity)
            .field("version", &self.version)
            .field("attributes", &self.attributes)
            .field("changes", &self.changes)
            .field("persisted", &self.persisted)
            .finish()
    }
}

impl Entity {
    /// Unsaved handle. A missing `_id` is generated; the version starts at 0.
    pub fn new(
        store: Arc<dyn StorageAdapter>,
        entity_type: Arc<EntityType>,
        mut fields: Document,
    ) -> Result<Self> {
        if entity_type.is_embedded() {
            return Err(LockError::InvalidOperation(format!(
                "'{}' is embedded and is stored through its root",
                entity_type.name()
            )));
        }
        if fields.contains_key(entity_type.version_field_name()) {
            return Err(LockError::InvalidOperation(format!(
                "'{}' is managed by optimistic locking",
                entity_type.version_field_name()
            )));
        }
        let identity = match Identity::from_document(&fields)? {
            Some(identity) => identity,
            None => {
                let identity = Identity::generate();
                fields.insert(ID_FIELD.to_string(), identity.to_value());
                identity
            }
        };
        let version = entity_type.participates().then_some(0);

        Ok(Self {
            store,
            entity_type,
            identity,
            version,
            attributes: fields,
            changes: BTreeSet::new(),
            persisted: false,
        })
    }

    /// Handle over a document read from storage; the version is split out of it.
    pub(crate) fn from_stored(
        store: Arc<dyn StorageAdapter>,
        entity_type: Arc<EntityType>,
        mut document: Document,
    ) -> Result<Self> {
        let identity = Identity::from_document(&document)?.ok_or_else(|| {
            LockError::Storage(format!(
                "stored {} document has no '{}'",
                entity_type.name(),
                ID_FIELD
            ))
        })?;
        let version = take_version(&entity_type, &mut document);
        Ok(Self {
            store,
            entity_type,
            identity,
            version,
            attributes: document,
            changes: BTreeSet::new(),
            persisted: true,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn store(&self) -> &Arc<dyn StorageAdapter> {
        &self.store
    }

    /// Current lock version; 0 for documents stored before locking was enabled.
    pub fn version(&self) -> u64 {
        self.version.unwrap_or(0)
    }

    /// `None` when the stored document carries no version field.
    pub fn raw_version(&self) -> Option<u64> {
        self.version
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn attributes(&self) -> &Document {
        &self.attributes
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.attributes, path)
    }

    /// Paths changed locally since the last write or reload.
    pub fn changed_fields(&self) -> Vec<String> {
        self.changes.iter().cloned().collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Stored form: attributes plus the version field when the type is locked.
    pub fn to_document(&self) -> Document {
        let mut document = self.attributes.clone();
        if self.entity_type.participates() {
            document.insert(
                self.entity_type.version_field_name().to_string(),
                Value::from(self.version()),
            );
        }
        document
    }

    /// Assigns `value` at `path` locally and records the change.
    pub fn set_attr(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.check_writable(path)?;
        apply_operation(&mut self.attributes, &UpdateOperation::set(path, value))?;
        self.changes.insert(path.to_string());
        Ok(())
    }

    /// Removes `path` locally and records the change.
    pub fn remove_attr(&mut self, path: &str) -> Result<()> {
        self.check_writable(path)?;
        apply_operation(&mut self.attributes, &UpdateOperation::unset(path))?;
        self.changes.insert(path.to_string());
        Ok(())
    }

    /// Persists a new handle with its initial version.
    pub async fn insert(&mut self) -> Result<()> {
        if self.persisted {
            return Err(LockError::InvalidOperation(format!(
                "{} '{}' is already persisted",
                self.entity_type.name(),
                self.identity
            )));
        }
        let version = self.entity_type.participates().then_some(self.version());
        self.version = version;
        self.store
            .insert(self.entity_type.collection_name(), self.to_document())
            .await?;
        self.persisted = true;
        self.changes.clear();
        debug!(
            "inserted {} '{}' at version {:?}",
            self.entity_type.name(),
            self.identity,
            self.version
        );
        Ok(())
    }

    /// Writes pending changes as one conditional update. No changes, no write.
    pub async fn save(&mut self) -> Result<()> {
        if !self.persisted {
            return self.insert().await;
        }
        if self.changes.is_empty() {
            return Ok(());
        }

        let mut composer = UpdateComposer::for_type(&self.entity_type);
        for path in &self.changes {
            match lookup_path(&self.attributes, path) {
                Some(value) => composer.add(UpdateOperation::set(path, value.clone()))?,
                None => composer.unset(path.as_str())?,
            }
        }
        let composed = self
            .store
            .compose_update(composer, self.entity_type.participates());
        self.commit(composed).await
    }

    /// Assigns every field of `fields`, then saves.
    pub async fn update_attributes(&mut self, fields: Document) -> Result<()> {
        for (path, value) in fields {
            self.set_attr(&path, value)?;
        }
        self.save().await
    }

    /// Atomic operator write, e.g. `apply(Set, {"name": "Paul"})`.
    ///
    /// On an unsaved handle the operation only changes local state.
    pub async fn apply(&mut self, operator: UpdateOperator, fields: Document) -> Result<()> {
        let mut composer = UpdateComposer::for_type(&self.entity_type);
        composer.accumulate_all(operator, fields)?;
        self.apply_composed(composer).await
    }

    /// Writes several typed operations as one composition.
    pub async fn apply_operations(
        &mut self,
        operations: impl IntoIterator<Item = UpdateOperation>,
    ) -> Result<()> {
        let mut composer = UpdateComposer::for_type(&self.entity_type);
        for operation in operations {
            composer.add(operation)?;
        }
        self.apply_composed(composer).await
    }

    pub async fn set(&mut self, fields: Document) -> Result<()> {
        self.apply(UpdateOperator::Set, fields).await
    }

    pub async fn unset(&mut self, fields: impl Into<UnsetArgs>) -> Result<()> {
        let mut composer = UpdateComposer::for_type(&self.entity_type);
        composer.unset(fields)?;
        self.apply_composed(composer).await
    }

    pub async fn inc(&mut self, fields: Document) -> Result<()> {
        self.apply(UpdateOperator::Increment, fields).await
    }

    pub async fn push(&mut self, fields: Document) -> Result<()> {
        self.apply(UpdateOperator::Push, fields).await
    }

    pub(crate) async fn apply_composed(&mut self, composer: UpdateComposer) -> Result<()> {
        if composer.is_empty() {
            return Ok(());
        }
        let composed = self
            .store
            .compose_update(composer, self.entity_type.participates());

        if !self.persisted {
            let mut staged = self.attributes.clone();
            let mut touched = Vec::new();
            for batch in composed.batches() {
                touched.extend(self.stage(&mut staged, batch)?);
            }
            self.attributes = staged;
            self.changes.extend(touched);
            return Ok(());
        }
        self.commit(composed).await
    }

    /// Replaces local state with the stored document, ignoring the version.
    pub async fn reload(&mut self) -> Result<()> {
        let selector = self.store.build_selector(
            &self.entity_type,
            &self.identity,
            self.version,
            &self.attributes,
            true,
        );
        let document = self
            .store
            .reload(self.entity_type.collection_name(), &selector)
            .await?
            .ok_or_else(|| LockError::DocumentNotFound {
                entity_type: self.entity_type.name().to_string(),
                identity: self.identity.clone(),
            })?;

        let mut document = document;
        self.version = take_version(&self.entity_type, &mut document);
        self.attributes = document;
        self.changes.clear();
        self.persisted = true;
        Ok(())
    }

    /// Issues every batch of `composed` in order, each as its own conditional write.
    pub(crate) async fn commit(&mut self, composed: ComposedUpdate) -> Result<()> {
        self.commit_guarded(composed, None).await
    }

    /// Like [`Self::commit`], but every write also requires `guard`
    /// (`(path, value)`) to hold in the stored document.
    pub(crate) async fn commit_guarded(
        &mut self,
        composed: ComposedUpdate,
        guard: Option<(String, Value)>,
    ) -> Result<()> {
        for batch in composed.into_batches() {
            if batch.is_empty() {
                continue;
            }
            self.commit_batch(&batch, guard.as_ref()).await?;
        }
        Ok(())
    }

    /// One conditional write. Local state only moves when the write matched.
    async fn commit_batch(
        &mut self,
        batch: &AtomicUpdateBatch,
        guard: Option<&(String, Value)>,
    ) -> Result<()> {
        let mut staged = self.attributes.clone();
        let touched = self.stage(&mut staged, batch)?;

        let mut selector = self.store.build_selector(
            &self.entity_type,
            &self.identity,
            self.version,
            &self.attributes,
            false,
        );
        if let Some((path, value)) = guard {
            selector = selector.guard(path, value.clone());
        }
        let matched = ConditionalUpdateExecutor::new(self.store.as_ref())
            .execute(self.entity_type.collection_name(), &selector, batch)
            .await?;
        ConflictDetector::for_selector(self.entity_type.name(), &selector).interpret(matched)?;

        if self.entity_type.participates() {
            self.version = Some(self.version.unwrap_or(0) + 1);
        }
        self.attributes = staged;
        self.changes
            .retain(|change| !touched.iter().any(|path| paths_overlap(change, path)));
        Ok(())
    }

    /// Applies `batch` to `staged`, skipping the version bump. Returns touched paths.
    fn stage(&self, staged: &mut Document, batch: &AtomicUpdateBatch) -> Result<Vec<String>> {
        let version_field = self.entity_type.version_field_name();
        let mut touched = Vec::new();
        for operation in batch.operations()? {
            if operation.path() == version_field {
                continue;
            }
            apply_operation(staged, &operation)?;
            touched.push(operation.path().to_string());
            if let UpdateOperation::Rename { to, .. } = &operation {
                touched.push(to.clone());
            }
        }
        Ok(touched)
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        if paths_overlap(path, self.entity_type.version_field_name()) || paths_overlap(path, ID_FIELD)
        {
            return Err(LockError::InvalidOperation(format!(
                "'{}' cannot be assigned on {}",
                path,
                self.entity_type.name()
            )));
        }
        Ok(())
    }
}

fn take_version(entity_type: &EntityType, document: &mut Document) -> Option<u64> {
    if !entity_type.participates() {
        return None;
    }
    document
        .remove(entity_type.version_field_name())
        .and_then(|value| value.as_u64())
}
