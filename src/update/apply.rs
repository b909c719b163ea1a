//! Applies update operations to an in-memory document.
//!
//! Used by the bundled store to execute writes and by entity handles to mirror
//! a successful write into their local attributes.

use crate::core::{Document, LockError, Result};
use crate::update::{AtomicUpdateBatch, PopEnd, UpdateOperation};
use serde_json::{Number, Value};

pub fn apply_batch(document: &mut Document, batch: &AtomicUpdateBatch) -> Result<()> {
    for operation in batch.operations()? {
        apply_operation(document, &operation)?;
    }
    Ok(())
}

pub fn apply_operation(document: &mut Document, operation: &UpdateOperation) -> Result<()> {
    match operation {
        UpdateOperation::Set { path, value } => {
            *slot(document, path)? = value.clone();
        }
        UpdateOperation::Unset { path } => {
            take(document, path);
        }
        UpdateOperation::Increment { path, by } => {
            let current = slot(document, path)?;
            *current = add_numbers(path, current, by)?;
        }
        UpdateOperation::BitwiseOp { path, op } => {
            let current = slot(document, path)?;
            let value = match &*current {
                Value::Null => 0,
                other => other.as_i64().ok_or_else(|| not_a(path, "an integer", other))?,
            };
            *current = Value::from(op.apply(value));
        }
        UpdateOperation::Push { path, value } => {
            array_at(document, path)?.push(value.clone());
        }
        UpdateOperation::PushEach { path, values } => {
            array_at(document, path)?.extend(values.iter().cloned());
        }
        UpdateOperation::AddToSet { path, value } => {
            let items = array_at(document, path)?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        UpdateOperation::AddToSetEach { path, values } => {
            let items = array_at(document, path)?;
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
        }
        UpdateOperation::Pull { path, value } => {
            if let Some(items) = existing_array(document, path)? {
                items.retain(|item| !pull_matches(item, value));
            }
        }
        UpdateOperation::PullAll { path, values } => {
            if let Some(items) = existing_array(document, path)? {
                items.retain(|item| !values.contains(item));
            }
        }
        UpdateOperation::Pop { path, end } => {
            if let Some(items) = existing_array(document, path)? {
                if !items.is_empty() {
                    match end {
                        PopEnd::First => {
                            items.remove(0);
                        }
                        PopEnd::Last => {
                            items.pop();
                        }
                    }
                }
            }
        }
        UpdateOperation::Rename { path, to } => {
            if let Some(value) = take(document, path) {
                *slot(document, to)? = value;
            }
        }
    }
    Ok(())
}

/// A sub-document payload pulls every element whose fields all match it.
fn pull_matches(item: &Value, pattern: &Value) -> bool {
    match (item, pattern) {
        (Value::Object(item), Value::Object(pattern)) => pattern
            .iter()
            .all(|(key, expected)| item.get(key) == Some(expected)),
        _ => item == pattern,
    }
}

fn add_numbers(path: &str, current: &Value, by: &Number) -> Result<Value> {
    let current = match current {
        Value::Null => return Ok(Value::Number(by.clone())),
        Value::Number(n) => n,
        other => return Err(not_a(path, "a number", other)),
    };
    if let (Some(a), Some(b)) = (current.as_i64(), by.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let (a, b) = (
        current.as_f64().unwrap_or_default(),
        by.as_f64().unwrap_or_default(),
    );
    Number::from_f64(a + b)
        .map(Value::Number)
        .ok_or_else(|| LockError::InvalidOperation(format!("increment of '{}' overflowed", path)))
}

fn not_a(path: &str, expected: &str, found: &Value) -> LockError {
    LockError::InvalidOperation(format!("'{}' is not {}: {}", path, expected, found))
}

/// Mutable slot at `path`, creating intermediate objects and a `null` leaf.
fn slot<'a>(document: &'a mut Document, path: &str) -> Result<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = document.entry(first.to_string()).or_insert(Value::Null);
    for segment in segments {
        if current.is_null() {
            *current = Value::Object(Document::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = segment.parse::<usize>().map_err(|_| {
                    LockError::InvalidOperation(format!(
                        "'{}' indexes an array with '{}'",
                        path, segment
                    ))
                })?;
                items.get_mut(index).ok_or_else(|| {
                    LockError::InvalidOperation(format!("'{}' is out of bounds", path))
                })?
            }
            other => return Err(not_a(path, "reachable through a sub-document", other)),
        };
    }
    Ok(current)
}

/// Existing value at `path`, without creating anything.
fn existing<'a>(document: &'a mut Document, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn existing_array<'a>(document: &'a mut Document, path: &str) -> Result<Option<&'a mut Vec<Value>>> {
    match existing(document, path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(other) => Err(not_a(path, "an array", other)),
    }
}

fn array_at<'a>(document: &'a mut Document, path: &str) -> Result<&'a mut Vec<Value>> {
    let current = slot(document, path)?;
    if current.is_null() {
        *current = Value::Array(Vec::new());
    }
    match current {
        Value::Array(items) => Ok(items),
        other => Err(not_a(path, "an array", other)),
    }
}

/// Removes and returns the value at `path`.
fn take(document: &mut Document, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => document.remove(path),
        Some((parent, leaf)) => match existing(document, parent)? {
            Value::Object(map) => map.remove(leaf),
            Value::Array(items) => {
                let index = leaf.parse::<usize>().ok()?;
                let element = items.get_mut(index)?;
                Some(std::mem::replace(element, Value::Null))
            }
            _ => None,
        },
    }
}
