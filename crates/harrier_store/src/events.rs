//! Change-event subscription: scopes, observers, and the dispatch registry.
//!
//! Observers see each committed mutation projected onto their own scope as a
//! before/after value-tuple pair. The store dispatches while the mutated
//! entity's map entry is still held, so for any one entity the events arrive
//! in commit order; across entities there is no ordering.
//!
//! Observers run on the mutating thread. They must be fast and must not call
//! back into the store, or the dispatch hold turns into a lock cycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use harrier_common::types::{EntityId, LabelId, PropertyKeyId};
use harrier_common::value::ValueTuple;

/// Subscription handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer:{}", self.0)
    }
}

/// What an observer is interested in: one label plus the full ordered set of
/// property keys whose values form the observed tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScope {
    pub label: LabelId,
    /// Tuple key order; matches the index descriptor's key order.
    pub keys: Vec<PropertyKeyId>,
}

impl ChangeScope {
    pub fn new(label: LabelId, keys: Vec<PropertyKeyId>) -> Self {
        ChangeScope { label, keys }
    }

    pub fn covers_key(&self, key: PropertyKeyId) -> bool {
        self.keys.contains(&key)
    }

    pub fn matches_labels(&self, labels: &[LabelId]) -> bool {
        labels.contains(&self.label)
    }
}

/// A committed mutation projected onto one observer's scope.
///
/// `None` on a side means the entity was not fully in scope on that side
/// (missing a scoped key, or deleted). `(None, Some)` is an appearance,
/// `(Some, None)` a disappearance, `(Some, Some)` a value change. Both-`None`
/// and value-equal changes are filtered out before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub entity: EntityId,
    pub before: Option<ValueTuple>,
    pub after: Option<ValueTuple>,
}

/// Receiver of scoped change events.
///
/// Called synchronously on the mutating thread, with the entity's map entry
/// held. Implementations must not block for long and must not call back into
/// the store.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, change: PropertyChange);
}

struct ObserverEntry {
    id: ObserverId,
    scope: ChangeScope,
    sink: Arc<dyn ChangeObserver>,
}

/// Which part of an entity a mutation touched. Deletion touches every key.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Touch {
    Key(PropertyKeyId),
    All,
}

/// Registered observers, read-mostly.
///
/// Dispatch iterates under the read lock and calls sinks while holding it.
/// `unregister` takes the write lock, so once it returns, no dispatch to
/// that observer is in flight and none will start: detach is synchronous.
pub(crate) struct ObserverRegistry {
    entries: RwLock<Vec<ObserverEntry>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        ObserverRegistry {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn register(&self, scope: ChangeScope, sink: Arc<dyn ChangeObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(ObserverEntry { id, scope, sink });
        tracing::debug!(observer = %id, "change observer registered");
        id
    }

    /// Remove an observer. Returns false if the id was unknown.
    pub(crate) fn unregister(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() < before;
        if removed {
            tracing::debug!(observer = %id, "change observer unregistered");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Dispatch one committed mutation. `project` builds the scoped
    /// before/after pair for a given scope, returning `None` when the change
    /// is invisible within that scope.
    pub(crate) fn dispatch<F>(&self, labels: &[LabelId], touched: Touch, mut project: F)
    where
        F: FnMut(&ChangeScope) -> Option<PropertyChange>,
    {
        let entries = self.entries.read();
        for entry in entries.iter() {
            if !entry.scope.matches_labels(labels) {
                continue;
            }
            if let Touch::Key(key) = touched {
                if !entry.scope.covers_key(key) {
                    continue;
                }
            }
            if let Some(change) = project(&entry.scope) {
                entry.sink.on_change(change);
            }
        }
    }
}
