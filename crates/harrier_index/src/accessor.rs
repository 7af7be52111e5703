//! The queryable index structure.
//!
//! Values are keyed by their order-preserving encoding in a `BTreeMap`, one
//! entity list per distinct value (non-unique). A reverse entity-to-key map
//! implements replace-on-add and remove-without-value, which is what makes
//! delta application idempotent: re-adding an entity with the same value is
//! a no-op, adding with a new value moves the single entry.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use harrier_common::types::EntityId;
use harrier_common::value::ValueTuple;

#[derive(Default)]
struct AccessorInner {
    /// Encoded value tuple to entities currently holding it.
    tree: BTreeMap<Vec<u8>, Vec<EntityId>>,
    /// Entity to the encoded tuple its entry is filed under.
    bound: HashMap<EntityId, Vec<u8>>,
}

/// Concurrent non-unique index accessor.
///
/// Safe for concurrent readers and writers; a single `RwLock` over both maps
/// keeps them consistent with each other. During population only the
/// populator and capture write here; once online, lookups and direct
/// mutation applications run concurrently.
#[derive(Default)]
pub struct IndexAccessor {
    inner: RwLock<AccessorInner>,
}

impl IndexAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or move the entry for `entity`. An entity has at most one entry:
    /// adding with a new value replaces the old entry, adding with the same
    /// value is a no-op.
    pub fn add(&self, entity: EntityId, value: &ValueTuple) {
        let key = value.encode();
        let mut inner = self.inner.write();
        let AccessorInner { tree, bound } = &mut *inner;
        if let Some(prev) = bound.get(&entity) {
            if *prev == key {
                return;
            }
            let prev = prev.clone();
            detach(tree, &prev, entity);
        }
        tree.entry(key.clone()).or_default().push(entity);
        bound.insert(entity, key);
    }

    /// Remove the entry for `entity`, if any. Returns whether one existed.
    pub fn remove(&self, entity: EntityId) -> bool {
        let mut inner = self.inner.write();
        let AccessorInner { tree, bound } = &mut *inner;
        match bound.remove(&entity) {
            Some(key) => {
                detach(tree, &key, entity);
                true
            }
            None => false,
        }
    }

    /// All entities whose entry matches `value` exactly. Order is entry
    /// insertion order; no duplicates by construction.
    pub fn exact_lookup(&self, value: &ValueTuple) -> Vec<EntityId> {
        let key = value.encode();
        self.inner.read().tree.get(&key).cloned().unwrap_or_default()
    }

    /// Number of entries (one per indexed entity).
    pub fn entry_count(&self) -> usize {
        self.inner.read().bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Drop all entries. Used when the index is dropped or its population
    /// is abandoned.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tree.clear();
        inner.bound.clear();
    }
}

fn detach(tree: &mut BTreeMap<Vec<u8>, Vec<EntityId>>, key: &[u8], entity: EntityId) {
    if let Some(entities) = tree.get_mut(key) {
        entities.retain(|e| *e != entity);
        if entities.is_empty() {
            tree.remove(key);
        }
    }
}
