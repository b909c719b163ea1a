use crate::core::{Identity, LockError, Result};
use crate::selector::Selector;

/// How a matched count is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One targeted document: nothing matched means the version moved, or
    /// the document is gone when the write carried no staleness predicate.
    Single,
    /// Filter-wide update: any count, zero included, is a success.
    Bulk,
}

/// Turns a write's matched count into success or a stale-object conflict.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector<'a> {
    entity_type: &'a str,
    identity: Option<&'a Identity>,
    checked: bool,
}

impl<'a> ConflictDetector<'a> {
    pub fn single(entity_type: &'a str, identity: &'a Identity) -> Self {
        Self {
            entity_type,
            identity: Some(identity),
            checked: true,
        }
    }

    /// Single-document detector for a write issued with `selector`.
    ///
    /// Without a version or guard predicate only a missing document can
    /// make the write miss, which is reported as `DocumentNotFound`.
    pub fn for_selector(entity_type: &'a str, selector: &'a Selector) -> Self {
        Self {
            entity_type,
            identity: Some(selector.identity()),
            checked: selector.is_version_checked() || selector.is_guarded(),
        }
    }

    pub fn bulk(entity_type: &'a str) -> Self {
        Self {
            entity_type,
            identity: None,
            checked: false,
        }
    }

    pub fn mode(&self) -> WriteMode {
        if self.identity.is_some() {
            WriteMode::Single
        } else {
            WriteMode::Bulk
        }
    }

    pub fn interpret(&self, matched: u64) -> Result<u64> {
        match self.identity {
            Some(identity) if matched == 0 && self.checked => {
                Err(LockError::stale(self.entity_type, identity))
            }
            Some(identity) if matched == 0 => Err(LockError::DocumentNotFound {
                entity_type: self.entity_type.to_string(),
                identity: identity.clone(),
            }),
            _ => Ok(matched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Document;
    use crate::registry::EntityType;
    use crate::selector::SelectorBuilder;
    use serde_json::json;

    #[test]
    fn single_write_without_match_is_stale() {
        let id = Identity::new("p1");
        let detector = ConflictDetector::single("person", &id);

        assert_eq!(detector.mode(), WriteMode::Single);
        assert_eq!(detector.interpret(1), Ok(1));
        assert_eq!(
            detector.interpret(0),
            Err(LockError::Stale {
                entity_type: "person".to_string(),
                identity: id.clone(),
            })
        );
    }

    #[test]
    fn unchecked_single_write_without_match_is_missing() {
        let note = EntityType::root("note");
        let id = Identity::new("n1");
        let selector = SelectorBuilder::new(&note).build(&id, None, &Document::new(), false);
        let detector = ConflictDetector::for_selector("note", &selector);

        assert_eq!(detector.interpret(1), Ok(1));
        assert!(matches!(
            detector.interpret(0),
            Err(LockError::DocumentNotFound { .. })
        ));

        let guarded = selector.clone().guard("phones.0._id", json!("home"));
        assert!(matches!(
            ConflictDetector::for_selector("note", &guarded).interpret(0),
            Err(LockError::Stale { .. })
        ));
    }

    #[test]
    fn bulk_tolerates_zero_and_partial_matches() {
        let detector = ConflictDetector::bulk("person");
        assert_eq!(detector.mode(), WriteMode::Bulk);
        assert_eq!(detector.interpret(0), Ok(0));
        assert_eq!(detector.interpret(7), Ok(7));
    }
}
