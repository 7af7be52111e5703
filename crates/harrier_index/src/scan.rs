//! Scanning existing store content into a new index.
//!
//! The scanner is injected into the population job, so tests can substitute
//! scripted scans (slow, failing, gated) without touching the store. The
//! production implementation walks the entity store; it is weakly consistent,
//! which is sufficient because every concurrent mutation is captured and
//! replayed over the scan's output.

use std::sync::Arc;

use harrier_common::error::IndexError;
use harrier_common::types::EntityId;
use harrier_common::value::ValueTuple;
use harrier_store::events::ChangeScope;
use harrier_store::store::EntityStore;

/// Source of the initial index contents.
pub trait IndexScanner: Send + Sync {
    /// Stream every entity currently in scope through `sink`, each at most
    /// once. A sink error aborts the scan and is returned as-is; the scan
    /// itself reports its own failures as [`IndexError::ScanFailed`].
    fn run(
        &self,
        sink: &mut dyn FnMut(EntityId, ValueTuple) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
}

/// Scanner over the live entity store.
pub struct StoreScanner {
    store: Arc<EntityStore>,
    scope: ChangeScope,
}

impl StoreScanner {
    pub fn new(store: Arc<EntityStore>, scope: ChangeScope) -> Self {
        StoreScanner { store, scope }
    }
}

impl IndexScanner for StoreScanner {
    fn run(
        &self,
        sink: &mut dyn FnMut(EntityId, ValueTuple) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let mut failed: Option<IndexError> = None;
        self.store.for_each_in_scope(&self.scope, &mut |entity, tuple| {
            match sink(entity, tuple) {
                Ok(()) => true,
                Err(e) => {
                    failed = Some(e);
                    false
                }
            }
        });
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
