use crate::core::{Result, paths_overlap};
use crate::update::{UpdateOperation, UpdateOperator};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Operator document for one atomic write: operator → (field path → payload).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicUpdateBatch {
    operations: BTreeMap<UpdateOperator, BTreeMap<String, Value>>,
}

impl AtomicUpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any previous payload for the same `(operator, path)`.
    pub fn insert(&mut self, operation: UpdateOperation) {
        let payload = operation.payload();
        self.operations
            .entry(operation.operator())
            .or_default()
            .insert(operation.path().to_string(), payload);
    }

    pub fn get(&self, operator: UpdateOperator, path: &str) -> Option<&Value> {
        self.operations.get(&operator)?.get(path)
    }

    pub fn contains(&self, operator: UpdateOperator, path: &str) -> bool {
        self.get(operator, path).is_some()
    }

    /// `true` when `path` collides with a path already held under another operator.
    pub fn conflicts_with(&self, operator: UpdateOperator, path: &str) -> bool {
        self.operations.iter().any(|(existing, fields)| {
            fields.keys().any(|field| {
                (*existing != operator || field != path) && paths_overlap(field, path)
            })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.operations.values().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.operations.values().map(BTreeMap::len).sum()
    }

    /// Adds `increment: { version_field: 1 }`.
    pub fn bump_version(&mut self, version_field: &str) {
        self.operations
            .entry(UpdateOperator::Increment)
            .or_default()
            .insert(version_field.to_string(), json!(1));
    }

    pub fn increments_version(&self, version_field: &str) -> bool {
        self.get(UpdateOperator::Increment, version_field) == Some(&json!(1))
    }

    pub fn touches(&self, path: &str) -> bool {
        self.operations
            .values()
            .any(|fields| fields.keys().any(|field| paths_overlap(field, path)))
    }

    /// Typed view of every entry, in operator order.
    pub fn operations(&self) -> Result<Vec<UpdateOperation>> {
        self.operations
            .iter()
            .flat_map(|(operator, fields)| {
                fields.iter().map(move |(path, payload)| {
                    UpdateOperation::from_wire(*operator, path, payload.clone())
                })
            })
            .collect()
    }

    /// Wire form: `{ "set": { "name": "Paul" }, "increment": { "lock_version": 1 } }`.
    pub fn to_document(&self) -> Value {
        let mut document = serde_json::Map::new();
        for (operator, fields) in &self.operations {
            if fields.is_empty() {
                continue;
            }
            let fields: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(path, payload)| (path.clone(), payload.clone()))
                .collect();
            document.insert(operator.as_str().to_string(), Value::Object(fields));
        }
        Value::Object(document)
    }
}

impl FromIterator<UpdateOperation> for AtomicUpdateBatch {
    fn from_iter<I: IntoIterator<Item = UpdateOperation>>(iter: I) -> Self {
        let mut batch = Self::new();
        for operation in iter {
            batch.insert(operation);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_operator_and_path_is_last_write_wins() {
        let batch: AtomicUpdateBatch = [
            UpdateOperation::set("name", "Paul"),
            UpdateOperation::set("name", "Jack"),
        ]
        .into_iter()
        .collect();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get(UpdateOperator::Set, "name"), Some(&json!("Jack")));
    }

    #[test]
    fn wire_document_groups_by_operator() {
        let mut batch: AtomicUpdateBatch = [
            UpdateOperation::set("name", "Paul"),
            UpdateOperation::unset("nickname"),
            UpdateOperation::rename("age", "old_age"),
        ]
        .into_iter()
        .collect();
        batch.bump_version("lock_version");

        assert_eq!(
            batch.to_document(),
            json!({
                "set": { "name": "Paul" },
                "unset": { "nickname": true },
                "increment": { "lock_version": 1 },
                "rename": { "age": "old_age" }
            })
        );
        assert!(batch.increments_version("lock_version"));
    }

    #[test]
    fn conflicts_are_cross_operator_overlaps() {
        let batch: AtomicUpdateBatch = [UpdateOperation::set("address", json!({}))]
            .into_iter()
            .collect();

        assert!(!batch.conflicts_with(UpdateOperator::Set, "address"));
        assert!(batch.conflicts_with(UpdateOperator::Set, "address.street"));
        assert!(batch.conflicts_with(UpdateOperator::Unset, "address"));
        assert!(!batch.conflicts_with(UpdateOperator::Push, "phones"));
    }

    #[test]
    fn operations_round_trip_to_typed_entries() {
        let batch: AtomicUpdateBatch = [UpdateOperation::inc("age", 2)].into_iter().collect();
        assert_eq!(batch.operations().unwrap(), vec![UpdateOperation::inc("age", 2)]);
    }
}
