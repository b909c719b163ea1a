use crate::core::{LockError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};
use std::fmt;
use std::str::FromStr;

/// Partial-update operators understood by the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOperator {
    Set,
    Unset,
    Increment,
    BitwiseOp,
    Push,
    PushEach,
    Pull,
    PullAll,
    AddToSet,
    AddToSetEach,
    Pop,
    Rename,
}

impl UpdateOperator {
    pub const ALL: [UpdateOperator; 12] = [
        Self::Set,
        Self::Unset,
        Self::Increment,
        Self::BitwiseOp,
        Self::Push,
        Self::PushEach,
        Self::Pull,
        Self::PullAll,
        Self::AddToSet,
        Self::AddToSetEach,
        Self::Pop,
        Self::Rename,
    ];

    /// Name used in the operator document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Unset => "unset",
            Self::Increment => "increment",
            Self::BitwiseOp => "bitwiseOp",
            Self::Push => "push",
            Self::PushEach => "pushEach",
            Self::Pull => "pull",
            Self::PullAll => "pullAll",
            Self::AddToSet => "addToSet",
            Self::AddToSetEach => "addToSetEach",
            Self::Pop => "pop",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateOperator {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| LockError::InvalidOperation(format!("unknown operator '{}'", s)))
    }
}

/// Operand set of a bitwise update; absent parts are skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitwiseOp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub and: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub or: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xor: Option<i64>,
}

impl BitwiseOp {
    pub fn and(mask: i64) -> Self {
        Self {
            and: Some(mask),
            ..Self::default()
        }
    }

    pub fn or(mask: i64) -> Self {
        Self {
            or: Some(mask),
            ..Self::default()
        }
    }

    pub fn xor(mask: i64) -> Self {
        Self {
            xor: Some(mask),
            ..Self::default()
        }
    }

    pub fn apply(&self, mut value: i64) -> i64 {
        if let Some(mask) = self.and {
            value &= mask;
        }
        if let Some(mask) = self.or {
            value |= mask;
        }
        if let Some(mask) = self.xor {
            value ^= mask;
        }
        value
    }
}

/// Which end of an array `Pop` removes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEnd {
    First,
    Last,
}

/// One field-level mutation with an operator-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    Set { path: String, value: Value },
    Unset { path: String },
    Increment { path: String, by: Number },
    BitwiseOp { path: String, op: BitwiseOp },
    Push { path: String, value: Value },
    PushEach { path: String, values: Vec<Value> },
    Pull { path: String, value: Value },
    PullAll { path: String, values: Vec<Value> },
    AddToSet { path: String, value: Value },
    AddToSetEach { path: String, values: Vec<Value> },
    Pop { path: String, end: PopEnd },
    Rename { path: String, to: String },
}

impl UpdateOperation {
    pub fn set(path: &str, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn unset(path: &str) -> Self {
        Self::Unset {
            path: path.to_string(),
        }
    }

    pub fn inc(path: &str, by: impl Into<Number>) -> Self {
        Self::Increment {
            path: path.to_string(),
            by: by.into(),
        }
    }

    pub fn push(path: &str, value: impl Into<Value>) -> Self {
        Self::Push {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn pull(path: &str, value: impl Into<Value>) -> Self {
        Self::Pull {
            path: path.to_string(),
            value: value.into(),
        }
    }

    pub fn rename(path: &str, to: &str) -> Self {
        Self::Rename {
            path: path.to_string(),
            to: to.to_string(),
        }
    }

    pub fn operator(&self) -> UpdateOperator {
        match self {
            Self::Set { .. } => UpdateOperator::Set,
            Self::Unset { .. } => UpdateOperator::Unset,
            Self::Increment { .. } => UpdateOperator::Increment,
            Self::BitwiseOp { .. } => UpdateOperator::BitwiseOp,
            Self::Push { .. } => UpdateOperator::Push,
            Self::PushEach { .. } => UpdateOperator::PushEach,
            Self::Pull { .. } => UpdateOperator::Pull,
            Self::PullAll { .. } => UpdateOperator::PullAll,
            Self::AddToSet { .. } => UpdateOperator::AddToSet,
            Self::AddToSetEach { .. } => UpdateOperator::AddToSetEach,
            Self::Pop { .. } => UpdateOperator::Pop,
            Self::Rename { .. } => UpdateOperator::Rename,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Unset { path }
            | Self::Increment { path, .. }
            | Self::BitwiseOp { path, .. }
            | Self::Push { path, .. }
            | Self::PushEach { path, .. }
            | Self::Pull { path, .. }
            | Self::PullAll { path, .. }
            | Self::AddToSet { path, .. }
            | Self::AddToSetEach { path, .. }
            | Self::Pop { path, .. }
            | Self::Rename { path, .. } => path,
        }
    }

    /// Payload as it appears in the operator document.
    pub fn payload(&self) -> Value {
        match self {
            Self::Set { value, .. }
            | Self::Push { value, .. }
            | Self::Pull { value, .. }
            | Self::AddToSet { value, .. } => value.clone(),
            Self::Unset { .. } => Value::Bool(true),
            Self::Increment { by, .. } => Value::Number(by.clone()),
            Self::BitwiseOp { op, .. } => json!(op),
            Self::PushEach { values, .. }
            | Self::PullAll { values, .. }
            | Self::AddToSetEach { values, .. } => Value::Array(values.clone()),
            Self::Pop { end, .. } => match end {
                PopEnd::First => json!(-1),
                PopEnd::Last => json!(1),
            },
            Self::Rename { to, .. } => Value::String(to.clone()),
        }
    }

    /// Parses one `(operator, path, payload)` entry, checking the payload shape.
    pub fn from_wire(operator: UpdateOperator, field: &str, payload: Value) -> Result<Self> {
        if field.is_empty() {
            return Err(LockError::InvalidOperation(format!(
                "{} requires a field path",
                operator
            )));
        }
        let path = field.to_string();
        let invalid = |expected: &str, payload: &Value| {
            LockError::InvalidOperation(format!(
                "{} on '{}' expects {}, got {}",
                operator, field, expected, payload
            ))
        };

        let operation = match operator {
            UpdateOperator::Set => Self::Set { path, value: payload },
            UpdateOperator::Unset => Self::Unset { path },
            UpdateOperator::Increment => match payload {
                Value::Number(by) => Self::Increment { path, by },
                other => return Err(invalid("a number", &other)),
            },
            UpdateOperator::BitwiseOp => {
                let op: BitwiseOp = serde_json::from_value(payload.clone())
                    .map_err(|_| invalid("{and|or|xor: integer}", &payload))?;
                Self::BitwiseOp { path, op }
            }
            UpdateOperator::Push => Self::Push { path, value: payload },
            UpdateOperator::Pull => Self::Pull { path, value: payload },
            UpdateOperator::AddToSet => Self::AddToSet { path, value: payload },
            UpdateOperator::PushEach | UpdateOperator::PullAll | UpdateOperator::AddToSetEach => {
                let values = match payload {
                    Value::Array(values) => values,
                    other => return Err(invalid("an array", &other)),
                };
                match operator {
                    UpdateOperator::PushEach => Self::PushEach { path, values },
                    UpdateOperator::PullAll => Self::PullAll { path, values },
                    _ => Self::AddToSetEach { path, values },
                }
            }
            UpdateOperator::Pop => match payload.as_i64() {
                Some(-1) => Self::Pop { path, end: PopEnd::First },
                Some(1) => Self::Pop { path, end: PopEnd::Last },
                _ => return Err(invalid("1 or -1", &payload)),
            },
            UpdateOperator::Rename => match payload {
                Value::String(to) if !to.is_empty() => Self::Rename { path, to },
                other => return Err(invalid("a field name string", &other)),
            },
        };
        Ok(operation)
    }
}
