//! Filter predicates: bulk filters and the per-write identity(+version) selector.

use crate::core::{Document, ID_FIELD, Identity, lookup_path};
use crate::registry::EntityType;
use serde_json::Value;
use std::collections::BTreeMap;

/// Conjunction of equality predicates over dotted field paths.
///
/// An empty filter matches every document. A scalar predicate against an
/// array field matches when the array contains the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: BTreeMap<String, Value>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.predicates.insert(path.to_string(), value.into());
        self
    }

    pub fn by_identity(identity: &Identity) -> Self {
        Self::all().eq(ID_FIELD, identity.to_value())
    }

    pub fn predicates(&self) -> &BTreeMap<String, Value> {
        &self.predicates
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.predicates.iter().all(|(path, expected)| {
            match lookup_path(document, path) {
                Some(actual) if actual == expected => true,
                Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
                Some(_) => false,
                None => expected.is_null(),
            }
        })
    }
}

/// Predicate for one conditional single-document write.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    identity: Identity,
    version: Option<(String, u64)>,
    shard: Option<(String, Value)>,
    guards: Vec<(String, Value)>,
}

impl Selector {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Version the write expects to find in storage, if it is version-checked.
    pub fn expected_version(&self) -> Option<u64> {
        self.version.as_ref().map(|(_, version)| *version)
    }

    pub fn is_version_checked(&self) -> bool {
        self.version.is_some()
    }

    /// Adds an equality predicate on a path inside the target document.
    pub fn guard(mut self, path: &str, value: Value) -> Self {
        self.guards.push((path.to_string(), value));
        self
    }

    pub fn is_guarded(&self) -> bool {
        !self.guards.is_empty()
    }

    pub fn to_filter(&self) -> Filter {
        let mut filter = Filter::by_identity(&self.identity);
        if let Some((field, version)) = &self.version {
            filter = filter.eq(field, *version);
        }
        if let Some((field, value)) = &self.shard {
            filter = filter.eq(field, value.clone());
        }
        for (path, value) in &self.guards {
            filter = filter.eq(path, value.clone());
        }
        filter
    }
}

/// Builds selectors for one entity type.
///
/// Selectors are rebuilt before every write: the expected version moves
/// forward after each success.
#[derive(Debug, Clone, Copy)]
pub struct SelectorBuilder<'a> {
    entity_type: &'a EntityType,
}

impl<'a> SelectorBuilder<'a> {
    pub fn new(entity_type: &'a EntityType) -> Self {
        Self { entity_type }
    }

    /// Identity-only when the type is unlocked, `skip_version` is set or the
    /// version is unknown; identity and version equality otherwise.
    pub fn build(
        &self,
        identity: &Identity,
        version: Option<u64>,
        attributes: &Document,
        skip_version: bool,
    ) -> Selector {
        let version = match version {
            Some(version) if self.entity_type.participates() && !skip_version => {
                Some((self.entity_type.version_field_name().to_string(), version))
            }
            _ => None,
        };
        let shard = self.entity_type.shard_key_field().map(|field| {
            (
                field.to_string(),
                lookup_path(attributes, field).cloned().unwrap_or(Value::Null),
            )
        });

        Selector {
            identity: identity.clone(),
            version,
            shard,
            guards: Vec::new(),
        }
    }
}
