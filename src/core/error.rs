use crate::core::Identity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    /// A single-document conditional write matched nothing: the stored version
    /// moved on since this handle last read it.
    #[error("Stale object: {entity_type} '{identity}' was modified concurrently")]
    Stale {
        entity_type: String,
        identity: Identity,
    },

    #[error("Embedded {entity_type} '{identity}' has no owning root")]
    MissingParent {
        entity_type: String,
        identity: Identity,
    },

    #[error(
        "Gave up on {entity_type} '{identity}' after {attempts} attempts: still stale"
    )]
    RetryExhausted {
        entity_type: String,
        identity: Identity,
        attempts: u32,
    },

    #[error("Document {entity_type} '{identity}' not found")]
    DocumentNotFound {
        entity_type: String,
        identity: Identity,
    },

    #[error("Invalid update operation: {0}")]
    InvalidOperation(String),

    #[error("Entity type '{0}' is not registered")]
    UnknownEntityType(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    pub fn stale(entity_type: impl Into<String>, identity: &Identity) -> Self {
        Self::Stale {
            entity_type: entity_type.into(),
            identity: identity.clone(),
        }
    }

    /// `true` for errors a caller may recover from by reloading.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Stale { .. } | Self::RetryExhausted { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Stale { identity, .. }
            | Self::MissingParent { identity, .. }
            | Self::RetryExhausted { identity, .. }
            | Self::DocumentNotFound { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub(crate) fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Stale {
                entity_type,
                identity,
            } => Self::RetryExhausted {
                entity_type,
                identity,
                attempts,
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for LockError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
