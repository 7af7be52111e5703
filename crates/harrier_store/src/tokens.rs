//! Label and property-key token interning.
//!
//! Descriptors and scopes refer to labels and property keys by dense integer
//! tokens, never by name. Interning is get-or-create and stable for the life
//! of the store; tokens are never reused.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use harrier_common::types::{LabelId, PropertyKeyId};

/// Two-way name/token maps for labels and property keys.
pub struct TokenRegistry {
    labels: DashMap<String, LabelId>,
    label_names: DashMap<LabelId, String>,
    keys: DashMap<String, PropertyKeyId>,
    key_names: DashMap<PropertyKeyId, String>,
    next_label: AtomicU32,
    next_key: AtomicU32,
}

impl TokenRegistry {
    pub fn new() -> Self {
        TokenRegistry {
            labels: DashMap::new(),
            label_names: DashMap::new(),
            keys: DashMap::new(),
            key_names: DashMap::new(),
            next_label: AtomicU32::new(0),
            next_key: AtomicU32::new(0),
        }
    }

    /// Intern a label name, returning its token. Concurrent callers racing
    /// on the same name all receive the same token.
    pub fn label_token(&self, name: &str) -> LabelId {
        if let Some(id) = self.labels.get(name) {
            return *id;
        }
        *self
            .labels
            .entry(name.to_string())
            .or_insert_with(|| {
                let id = LabelId(self.next_label.fetch_add(1, Ordering::Relaxed));
                self.label_names.insert(id, name.to_string());
                id
            })
            .value()
    }

    /// Intern a property-key name, returning its token.
    pub fn property_token(&self, name: &str) -> PropertyKeyId {
        if let Some(id) = self.keys.get(name) {
            return *id;
        }
        *self
            .keys
            .entry(name.to_string())
            .or_insert_with(|| {
                let id = PropertyKeyId(self.next_key.fetch_add(1, Ordering::Relaxed));
                self.key_names.insert(id, name.to_string());
                id
            })
            .value()
    }

    pub fn label_name(&self, id: LabelId) -> Option<String> {
        self.label_names.get(&id).map(|n| n.clone())
    }

    pub fn property_name(&self, id: PropertyKeyId) -> Option<String> {
        self.key_names.get(&id).map(|n| n.clone())
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn property_count(&self) -> usize {
        self.keys.len()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}
