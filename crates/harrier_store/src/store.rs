//! The concurrent entity store.
//!
//! Entities live in a `DashMap`; a mutation holds the entity's map entry
//! while it applies the change and dispatches it to observers, which is what
//! serializes the event stream per entity. Deletion removes the entry first
//! and dispatches after: the id is never reused, so the deletion event is
//! the entity's last and needs no entry to order against.
//!
//! Lock order, here and downstream: entity shard, then observer registry
//! (read), then whatever locks an observer takes. Observers must not call
//! back into the store (see `events`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use harrier_common::error::StoreError;
use harrier_common::types::{EntityId, LabelId, PropertyKeyId};
use harrier_common::value::{PropertyValue, ValueTuple};

use crate::events::{ChangeObserver, ChangeScope, ObserverId, ObserverRegistry, PropertyChange, Touch};
use crate::tokens::TokenRegistry;

#[derive(Debug, Clone)]
struct EntityRecord {
    labels: Vec<LabelId>,
    props: HashMap<PropertyKeyId, PropertyValue>,
}

/// In-memory entity store with synchronous, scoped change dispatch.
pub struct EntityStore {
    entities: DashMap<EntityId, EntityRecord>,
    tokens: TokenRegistry,
    observers: ObserverRegistry,
    next_entity: AtomicU64,
}

impl EntityStore {
    pub fn new() -> Self {
        EntityStore {
            entities: DashMap::new(),
            tokens: TokenRegistry::new(),
            observers: ObserverRegistry::new(),
            next_entity: AtomicU64::new(0),
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Create an entity carrying `labels` and no properties. Labels are
    /// fixed for the entity's lifetime. Ids are monotone and never reused.
    pub fn create_entity(&self, labels: &[LabelId]) -> EntityId {
        let id = EntityId(self.next_entity.fetch_add(1, Ordering::Relaxed) + 1);
        self.entities.insert(
            id,
            EntityRecord {
                labels: labels.to_vec(),
                props: HashMap::new(),
            },
        );
        id
    }

    /// Set (or overwrite) one property. Setting the value already present is
    /// a no-op and dispatches nothing.
    pub fn set_property(
        &self,
        entity: EntityId,
        key: PropertyKeyId,
        value: PropertyValue,
    ) -> Result<(), StoreError> {
        let mut rec = self
            .entities
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        let old = rec.props.insert(key, value);
        if old.as_ref() == rec.props.get(&key) {
            return Ok(());
        }
        self.observers
            .dispatch(&rec.labels, Touch::Key(key), |scope| {
                let before = scoped_tuple(&rec.props, &scope.keys, Some((key, old.as_ref())));
                let after = scoped_tuple(&rec.props, &scope.keys, None);
                if before == after {
                    return None;
                }
                Some(PropertyChange {
                    entity,
                    before,
                    after,
                })
            });
        Ok(())
    }

    /// Remove one property, returning its previous value. Removing a
    /// property that is not present is a no-op.
    pub fn remove_property(
        &self,
        entity: EntityId,
        key: PropertyKeyId,
    ) -> Result<Option<PropertyValue>, StoreError> {
        let mut rec = self
            .entities
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        let old = rec.props.remove(&key);
        if old.is_none() {
            return Ok(None);
        }
        self.observers
            .dispatch(&rec.labels, Touch::Key(key), |scope| {
                let before = scoped_tuple(&rec.props, &scope.keys, Some((key, old.as_ref())));
                let after = scoped_tuple(&rec.props, &scope.keys, None);
                if before == after {
                    return None;
                }
                Some(PropertyChange {
                    entity,
                    before,
                    after,
                })
            });
        Ok(old)
    }

    /// Delete an entity. Observers in scope see a disappearance carrying the
    /// entity's final values.
    pub fn delete_entity(&self, entity: EntityId) -> Result<(), StoreError> {
        let (_, rec) = self
            .entities
            .remove(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        self.observers.dispatch(&rec.labels, Touch::All, |scope| {
            let before = scoped_tuple(&rec.props, &scope.keys, None)?;
            Some(PropertyChange {
                entity,
                before: Some(before),
                after: None,
            })
        });
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn property_of(&self, entity: EntityId, key: PropertyKeyId) -> Option<PropertyValue> {
        self.entities
            .get(&entity)
            .and_then(|rec| rec.props.get(&key).cloned())
    }

    pub fn labels_of(&self, entity: EntityId) -> Option<Vec<LabelId>> {
        self.entities.get(&entity).map(|rec| rec.labels.clone())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Visit every entity currently in `scope`, yielding its id and scoped
    /// value tuple. Return `false` from `f` to stop early.
    ///
    /// Iteration is weakly consistent with concurrent mutations: an entity
    /// present for the whole pass is yielded exactly once, one inserted or
    /// removed mid-pass may or may not be seen. The shard holding the
    /// visited entity is read-locked while `f` runs.
    pub fn for_each_in_scope(
        &self,
        scope: &ChangeScope,
        f: &mut dyn FnMut(EntityId, ValueTuple) -> bool,
    ) {
        for entry in self.entities.iter() {
            let rec = entry.value();
            if !scope.matches_labels(&rec.labels) {
                continue;
            }
            let Some(tuple) = scoped_tuple(&rec.props, &scope.keys, None) else {
                continue;
            };
            if !f(*entry.key(), tuple) {
                return;
            }
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Register a change observer. Events for mutations that commit after
    /// registration returns are guaranteed to reach the observer.
    pub fn register_observer(
        &self,
        scope: ChangeScope,
        sink: Arc<dyn ChangeObserver>,
    ) -> ObserverId {
        self.observers.register(scope, sink)
    }

    /// Remove an observer. When this returns, no dispatch to it is in
    /// flight and none will start.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Project `props` onto `keys`, in key order. `replace` substitutes one
/// key's value (`None` meaning absent), which is how the before-side of a
/// mutation is reconstructed after the map has already been updated.
/// Returns `None` unless every key has a value.
fn scoped_tuple(
    props: &HashMap<PropertyKeyId, PropertyValue>,
    keys: &[PropertyKeyId],
    replace: Option<(PropertyKeyId, Option<&PropertyValue>)>,
) -> Option<ValueTuple> {
    let mut values = Vec::with_capacity(keys.len());
    for &key in keys {
        let value = match replace {
            Some((rk, rv)) if rk == key => rv.cloned(),
            _ => props.get(&key).cloned(),
        };
        values.push(value?);
    }
    Some(ValueTuple(values))
}
