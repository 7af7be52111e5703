//! Index descriptors: what an index covers.

use serde::{Deserialize, Serialize};
use std::fmt;

use harrier_common::error::IndexError;
use harrier_common::types::{LabelId, PropertyKeyId};
use harrier_store::events::ChangeScope;

/// Scope definition for one index: a label and one or more property keys.
/// Key order is the tuple order of indexed values. Immutable once created.
///
/// The `unique` flag is carried for schema fidelity; only non-unique indexes
/// are supported and creation rejects `unique = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub label: LabelId,
    pub keys: Vec<PropertyKeyId>,
    pub unique: bool,
}

impl IndexDescriptor {
    /// Non-unique index over `label` and `keys`.
    pub fn new(label: LabelId, keys: Vec<PropertyKeyId>) -> Self {
        IndexDescriptor {
            label,
            keys,
            unique: false,
        }
    }

    /// Validate shape: at least one key, no duplicate keys, not unique.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.unique {
            return Err(IndexError::Unsupported(
                "unique indexes are not supported".to_string(),
            ));
        }
        if self.keys.is_empty() {
            return Err(IndexError::InvalidDescriptor(
                "at least one property key is required".to_string(),
            ));
        }
        let mut sorted = self.keys.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != self.keys.len() {
            return Err(IndexError::InvalidDescriptor(format!(
                "duplicate property key in {self}"
            )));
        }
        Ok(())
    }

    /// The change/scan scope this descriptor covers.
    pub fn scope(&self) -> ChangeScope {
        ChangeScope::new(self.label, self.keys.clone())
    }

    /// Normalized scope identity for duplicate detection. Key order does not
    /// create a distinct scope: an index over (a, b) blocks one over (b, a).
    pub fn scope_key(&self) -> ScopeKey {
        let mut keys = self.keys.clone();
        keys.sort();
        ScopeKey {
            label: self.label,
            keys,
        }
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.label)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, ")")
    }
}

/// Normalized (label, sorted keys) identity of an index scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    label: LabelId,
    keys: Vec<PropertyKeyId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_descriptor_passes() {
        let d = IndexDescriptor::new(LabelId(1), vec![PropertyKeyId(0)]);
        assert!(d.validate().is_ok());
        assert!(!d.unique);
    }

    #[test]
    fn unique_flag_is_rejected() {
        let mut d = IndexDescriptor::new(LabelId(1), vec![PropertyKeyId(0)]);
        d.unique = true;
        assert!(matches!(d.validate(), Err(IndexError::Unsupported(_))));
    }

    #[test]
    fn empty_and_duplicate_keys_are_rejected() {
        let d = IndexDescriptor::new(LabelId(1), vec![]);
        assert!(matches!(d.validate(), Err(IndexError::InvalidDescriptor(_))));

        let d = IndexDescriptor::new(LabelId(1), vec![PropertyKeyId(2), PropertyKeyId(2)]);
        assert!(matches!(d.validate(), Err(IndexError::InvalidDescriptor(_))));
    }

    #[test]
    fn scope_key_ignores_key_order() {
        let ab = IndexDescriptor::new(LabelId(1), vec![PropertyKeyId(1), PropertyKeyId(2)]);
        let ba = IndexDescriptor::new(LabelId(1), vec![PropertyKeyId(2), PropertyKeyId(1)]);
        assert_eq!(ab.scope_key(), ba.scope_key());
        assert_ne!(ab.scope(), ba.scope(), "tuple order still differs");

        let other_label = IndexDescriptor::new(LabelId(2), vec![PropertyKeyId(1), PropertyKeyId(2)]);
        assert_ne!(ab.scope_key(), other_label.scope_key());
    }

    #[test]
    fn display_is_compact() {
        let d = IndexDescriptor::new(LabelId(3), vec![PropertyKeyId(1), PropertyKeyId(4)]);
        assert_eq!(d.to_string(), "label:3(prop:1,prop:4)");
    }
}
