use crate::core::{Document, LockError, Result, paths_overlap};
use crate::registry::EntityType;
use crate::update::{AtomicUpdateBatch, UpdateOperation, UpdateOperator};
use serde_json::Value;

/// Argument shapes accepted by `unset`.
///
/// A mapping contributes its keys; the values are ignored, even `null` or `false`.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsetArgs {
    Field(String),
    Fields(Vec<String>),
    Mapping(Document),
}

impl UnsetArgs {
    pub fn into_fields(self) -> Vec<String> {
        match self {
            Self::Field(field) => vec![field],
            Self::Fields(fields) => fields,
            Self::Mapping(mapping) => mapping.into_iter().map(|(field, _)| field).collect(),
        }
    }
}

impl From<&str> for UnsetArgs {
    fn from(field: &str) -> Self {
        Self::Field(field.to_string())
    }
}

impl From<String> for UnsetArgs {
    fn from(field: String) -> Self {
        Self::Field(field)
    }
}

impl From<Vec<&str>> for UnsetArgs {
    fn from(fields: Vec<&str>) -> Self {
        Self::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for UnsetArgs {
    fn from(fields: Vec<String>) -> Self {
        Self::Fields(fields)
    }
}

impl From<Document> for UnsetArgs {
    fn from(mapping: Document) -> Self {
        Self::Mapping(mapping)
    }
}

/// Output of a composition.
///
/// `primary` is written first. Each entry of `conflicts` holds modifications
/// whose paths collide with another operator in an earlier batch and is written
/// afterwards as its own locked update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedUpdate {
    pub primary: AtomicUpdateBatch,
    pub conflicts: Vec<AtomicUpdateBatch>,
}

impl ComposedUpdate {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.conflicts.iter().all(AtomicUpdateBatch::is_empty)
    }

    /// Every batch in write order.
    pub fn batches(&self) -> impl Iterator<Item = &AtomicUpdateBatch> {
        std::iter::once(&self.primary).chain(self.conflicts.iter())
    }

    pub fn into_batches(self) -> Vec<AtomicUpdateBatch> {
        std::iter::once(self.primary).chain(self.conflicts).collect()
    }
}

/// Accumulates partial updates for one target document.
#[derive(Debug, Clone)]
pub struct UpdateComposer {
    version_field: String,
    batches: Vec<AtomicUpdateBatch>,
}

impl UpdateComposer {
    pub fn new(version_field: &str) -> Self {
        Self {
            version_field: version_field.to_string(),
            batches: vec![AtomicUpdateBatch::new()],
        }
    }

    pub fn for_type(entity_type: &EntityType) -> Self {
        Self::new(entity_type.version_field_name())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(AtomicUpdateBatch::is_empty)
    }

    /// Adds one generic `(operator, path, value)` entry. `Unset` goes through [`Self::unset`].
    pub fn accumulate(&mut self, operator: UpdateOperator, path: &str, value: Value) -> Result<()> {
        if operator == UpdateOperator::Unset {
            return Err(LockError::InvalidOperation(format!(
                "unset of '{}' must be composed through unset()",
                path
            )));
        }
        let operation = UpdateOperation::from_wire(operator, path, value)?;
        self.place(operation)
    }

    /// Adds every `(path, value)` of `fields` under `operator`.
    pub fn accumulate_all(&mut self, operator: UpdateOperator, fields: Document) -> Result<()> {
        if operator == UpdateOperator::Unset {
            return self.unset(UnsetArgs::Mapping(fields));
        }
        for (path, value) in fields {
            self.accumulate(operator, &path, value)?;
        }
        Ok(())
    }

    /// Adds an already typed operation.
    pub fn add(&mut self, operation: UpdateOperation) -> Result<()> {
        match operation {
            UpdateOperation::Unset { path } => self.unset(UnsetArgs::Field(path)),
            other => self.place(other),
        }
    }

    /// Normalizes every field named by `args` to an `unset: { field: true }` entry.
    pub fn unset(&mut self, args: impl Into<UnsetArgs>) -> Result<()> {
        for field in args.into().into_fields() {
            if field.is_empty() {
                return Err(LockError::InvalidOperation(
                    "unset requires a field path".to_string(),
                ));
            }
            self.place(UpdateOperation::Unset { path: field })?;
        }
        Ok(())
    }

    /// Returns the composed batches, each carrying the version bump when `participates`.
    pub fn finalize(self, participates: bool) -> ComposedUpdate {
        let version_field = self.version_field;
        let mut batches: Vec<AtomicUpdateBatch> = self
            .batches
            .into_iter()
            .filter(|batch| !batch.is_empty())
            .collect();
        if batches.is_empty() {
            batches.push(AtomicUpdateBatch::new());
        }
        if participates {
            for batch in &mut batches {
                batch.bump_version(&version_field);
            }
        }

        let mut batches = batches.into_iter();
        let primary = batches.next().unwrap_or_default();
        ComposedUpdate {
            primary,
            conflicts: batches.collect(),
        }
    }

    fn place(&mut self, operation: UpdateOperation) -> Result<()> {
        let (operator, path) = (operation.operator(), operation.path());
        if paths_overlap(path, &self.version_field) {
            return Err(LockError::InvalidOperation(format!(
                "'{}' is managed by optimistic locking and cannot be updated directly",
                self.version_field
            )));
        }
        if let UpdateOperation::Rename { to, .. } = &operation {
            if paths_overlap(to, &self.version_field) {
                return Err(LockError::InvalidOperation(format!(
                    "cannot rename onto '{}'",
                    self.version_field
                )));
            }
        }

        let target = self
            .batches
            .iter()
            .position(|batch| batch.contains(operator, path))
            .or_else(|| {
                self.batches
                    .iter()
                    .position(|batch| !batch.conflicts_with(operator, path))
            });
        match target {
            Some(index) => self.batches[index].insert(operation),
            None => {
                let mut batch = AtomicUpdateBatch::new();
                batch.insert(operation);
                self.batches.push(batch);
            }
        }
        Ok(())
    }
}
