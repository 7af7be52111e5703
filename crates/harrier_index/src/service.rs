//! Index lifecycle: create, await online, query, drop.
//!
//! `IndexingService` ties the pieces together. Creation follows one rule
//! everything else depends on: the capture observer is registered with the
//! store before the population job is handed to the scheduler. From that
//! point every committed mutation in scope is either in the scan's snapshot
//! or in the capture stream, however long the scheduler delays the job.
//!
//! The service owns its scheduler; there is no process-global execution
//! context. Dropping the service drops every index, which releases the store
//! subscriptions and signals running populations to stop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use harrier_common::config::PopulationConfig;
use harrier_common::error::IndexError;
use harrier_common::scheduler::{JobScheduler, ThreadScheduler};
use harrier_common::signal::StopSignal;
use harrier_common::types::{EntityId, IndexId, PopulationState};
use harrier_common::value::ValueTuple;
use harrier_store::events::{ChangeObserver, ObserverId};
use harrier_store::store::EntityStore;

use crate::accessor::IndexAccessor;
use crate::delta::DeltaBuffer;
use crate::descriptor::{IndexDescriptor, ScopeKey};
use crate::populate::IndexPopulator;
use crate::scan::{IndexScanner, StoreScanner};
use crate::state::{PopulationMetrics, PopulationMetricsSnapshot, StateCell};

/// How a query should treat an index that is not yet online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Fail immediately with `NotOnline`.
    FailFast,
    /// Block up to the given duration for the index to come online.
    Await(Duration),
}

struct IndexInstance {
    id: IndexId,
    descriptor: IndexDescriptor,
    accessor: Arc<IndexAccessor>,
    buffer: Arc<DeltaBuffer>,
    cell: Arc<StateCell>,
    metrics: Arc<PopulationMetrics>,
    stop: StopSignal,
    observer: ObserverId,
}

/// Lifecycle surface for non-unique secondary indexes over one entity store.
pub struct IndexingService {
    store: Arc<EntityStore>,
    scheduler: Arc<dyn JobScheduler>,
    config: PopulationConfig,
    indexes: DashMap<IndexId, Arc<IndexInstance>>,
    scopes: DashMap<ScopeKey, IndexId>,
    next_index: AtomicU64,
}

impl IndexingService {
    pub fn new(
        store: Arc<EntityStore>,
        scheduler: Arc<dyn JobScheduler>,
        config: PopulationConfig,
    ) -> Self {
        IndexingService {
            store,
            scheduler,
            config,
            indexes: DashMap::new(),
            scopes: DashMap::new(),
            next_index: AtomicU64::new(0),
        }
    }

    /// Service with a thread-per-job scheduler and default tuning.
    pub fn with_defaults(store: Arc<EntityStore>) -> Self {
        IndexingService::new(
            store,
            Arc::new(ThreadScheduler::new()),
            PopulationConfig::default(),
        )
    }

    /// Create an index over the store's current and future contents and
    /// start populating it in the background. Returns as soon as the
    /// population job is scheduled; use [`await_online`](Self::await_online)
    /// to wait for it.
    ///
    /// At most one index per scope: a second creation over the same label
    /// and key set (in any key order) is rejected.
    pub fn create_index(&self, descriptor: IndexDescriptor) -> Result<IndexId, IndexError> {
        let scope = descriptor.scope();
        let scanner = Arc::new(StoreScanner::new(Arc::clone(&self.store), scope));
        self.create_index_with_scanner(descriptor, scanner)
    }

    /// Like [`create_index`](Self::create_index) but with an injected
    /// initial-contents scanner. The capture path is unaffected; only the
    /// source of the scanned snapshot changes.
    pub fn create_index_with_scanner(
        &self,
        descriptor: IndexDescriptor,
        scanner: Arc<dyn IndexScanner>,
    ) -> Result<IndexId, IndexError> {
        descriptor.validate()?;
        let key = descriptor.scope_key();
        let id = IndexId(self.next_index.fetch_add(1, Ordering::Relaxed) + 1);

        // Reserve the scope. Losing this race is the duplicate-scope error.
        match self.scopes.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(IndexError::ScopeAlreadyIndexed {
                    scope: descriptor.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let accessor = Arc::new(IndexAccessor::new());
        let cell = Arc::new(StateCell::new());
        let metrics = Arc::new(PopulationMetrics::default());
        let buffer = Arc::new(DeltaBuffer::new(
            self.config.capture_capacity,
            Arc::clone(&accessor),
            Arc::clone(&cell),
            Arc::clone(&metrics),
        ));
        let stop = StopSignal::new();

        // Capture starts here, strictly before the job is scheduled. The
        // registration takes the observer write lock, so once it returns,
        // every later commit in scope reaches the buffer.
        let observer = self
            .store
            .register_observer(descriptor.scope(), Arc::clone(&buffer) as Arc<dyn ChangeObserver>);

        let instance = Arc::new(IndexInstance {
            id,
            descriptor,
            accessor: Arc::clone(&accessor),
            buffer: Arc::clone(&buffer),
            cell: Arc::clone(&cell),
            metrics: Arc::clone(&metrics),
            stop: stop.clone(),
            observer,
        });
        self.indexes.insert(id, Arc::clone(&instance));

        let populator = IndexPopulator::new(
            id,
            accessor,
            buffer,
            cell,
            metrics,
            scanner,
            stop,
            self.config.clone(),
        );
        let job = format!("populate-{}", id.0);
        if let Err(e) = self.scheduler.spawn(&job, Box::new(move || populator.run())) {
            // Roll back so the scope is free to retry.
            self.indexes.remove(&id);
            self.scopes.remove_if(&key, |_, owner| *owner == id);
            self.store.unregister_observer(instance.observer);
            instance.buffer.detach();
            instance.cell.mark_dropped();
            return Err(e.into());
        }

        tracing::info!(index = %id, descriptor = %instance.descriptor, "index created");
        Ok(id)
    }

    /// Block until the index is online, its population fails, it is
    /// dropped, or `timeout` elapses. Failure is reported as soon as it
    /// happens, not at the deadline.
    pub fn await_online(&self, id: IndexId, timeout: Duration) -> Result<(), IndexError> {
        // Clone the cell out so the registry shard is not held while blocked.
        let cell = self
            .indexes
            .get(&id)
            .map(|i| Arc::clone(&i.cell))
            .ok_or(IndexError::NotFound(id))?;
        cell.await_online(id, timeout)
    }

    /// Wait for every current index to come online, sharing one deadline.
    /// Indexes dropped while waiting are skipped; the first failure or
    /// timeout aborts the wait.
    pub fn await_all_online(&self, timeout: Duration) -> Result<(), IndexError> {
        let deadline = Instant::now() + timeout;
        let targets: Vec<(IndexId, Arc<StateCell>)> = self
            .indexes
            .iter()
            .map(|e| (e.id, Arc::clone(&e.cell)))
            .collect();
        for (id, cell) in targets {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match cell.await_online(id, remaining) {
                Ok(()) => {}
                Err(IndexError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn state(&self, id: IndexId) -> Result<PopulationState, IndexError> {
        self.indexes
            .get(&id)
            .map(|i| i.cell.state())
            .ok_or(IndexError::NotFound(id))
    }

    pub fn metrics(&self, id: IndexId) -> Result<PopulationMetricsSnapshot, IndexError> {
        self.indexes
            .get(&id)
            .map(|i| i.metrics.snapshot())
            .ok_or(IndexError::NotFound(id))
    }

    /// Current indexes with their states, ordered by id.
    pub fn list(&self) -> Vec<(IndexId, IndexDescriptor, PopulationState)> {
        let mut out: Vec<_> = self
            .indexes
            .iter()
            .map(|e| (e.id, e.descriptor.clone(), e.cell.state()))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    /// Drop an index in any state. A running population is signalled to
    /// stop, the store subscription is released synchronously, awaiters are
    /// woken with `NotFound`, and the scope becomes free to recreate. Does
    /// not block on the population job.
    pub fn drop_index(&self, id: IndexId) -> Result<(), IndexError> {
        let (_, instance) = self
            .indexes
            .remove(&id)
            .ok_or(IndexError::NotFound(id))?;
        self.scopes
            .remove_if(&instance.descriptor.scope_key(), |_, owner| *owner == id);
        instance.stop.stop();
        self.store.unregister_observer(instance.observer);
        instance.buffer.detach();
        instance.cell.mark_dropped();
        instance.accessor.clear();
        tracing::info!(index = %id, "index dropped");
        Ok(())
    }

    /// Exact-match lookup. Returns the ids of all entities whose indexed
    /// tuple equals `value`, in ascending id order.
    pub fn exact_query(
        &self,
        id: IndexId,
        value: &ValueTuple,
        readiness: Readiness,
    ) -> Result<EntityIdCursor, IndexError> {
        match readiness {
            Readiness::Await(timeout) => self.await_online(id, timeout)?,
            Readiness::FailFast => {
                let state = self.state(id)?;
                if state != PopulationState::Online {
                    return Err(IndexError::NotOnline { id, state });
                }
            }
        }
        let accessor = self
            .indexes
            .get(&id)
            .map(|i| Arc::clone(&i.accessor))
            .ok_or(IndexError::NotFound(id))?;
        let mut hits = accessor.exact_lookup(value);
        hits.sort();
        Ok(EntityIdCursor::new(hits))
    }

    /// Drop every index. Populations are signalled to stop and all store
    /// subscriptions are released; the store itself is untouched.
    pub fn shutdown(&self) {
        let ids: Vec<IndexId> = self.indexes.iter().map(|e| e.id).collect();
        for id in ids {
            let _ = self.drop_index(id);
        }
    }
}

impl Drop for IndexingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cursor over the entity ids matched by an exact query. A materialized
/// point-in-time result; it does not observe later mutations.
#[derive(Debug)]
pub struct EntityIdCursor {
    inner: std::vec::IntoIter<EntityId>,
}

impl EntityIdCursor {
    fn new(hits: Vec<EntityId>) -> Self {
        EntityIdCursor {
            inner: hits.into_iter(),
        }
    }
}

impl Iterator for EntityIdCursor {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for EntityIdCursor {}

#[cfg(test)]
mod tests {
    use super::*;
    use harrier_common::scheduler::SlowScheduler;
    use harrier_common::types::LabelId;

    const WAIT: Duration = Duration::from_secs(10);

    fn seeded_store(values: &[&str]) -> (Arc<EntityStore>, LabelId, harrier_common::types::PropertyKeyId) {
        let store = Arc::new(EntityStore::new());
        let label = store.tokens().label_token("Person");
        let key = store.tokens().property_token("name");
        for v in values {
            let id = store.create_entity(&[label]);
            store.set_property(id, key, (*v).into()).unwrap();
        }
        (store, label, key)
    }

    fn descriptor(store: &EntityStore) -> IndexDescriptor {
        let label = store.tokens().label_token("Person");
        let key = store.tokens().property_token("name");
        IndexDescriptor::new(label, vec![key])
    }

    struct FailingScanner;

    impl IndexScanner for FailingScanner {
        fn run(
            &self,
            _sink: &mut dyn FnMut(EntityId, ValueTuple) -> Result<(), IndexError>,
        ) -> Result<(), IndexError> {
            Err(IndexError::ScanFailed {
                reason: "synthetic scan failure".into(),
            })
        }
    }

    #[test]
    fn create_await_query_roundtrip() {
        let (store, _, _) = seeded_store(&["ada", "brin", "ada"]);
        let service = IndexingService::with_defaults(Arc::clone(&store));

        let id = service.create_index(descriptor(&store)).unwrap();
        service.await_online(id, WAIT).unwrap();
        assert_eq!(service.state(id).unwrap(), PopulationState::Online);

        let cursor = service
            .exact_query(id, &ValueTuple::single("ada"), Readiness::FailFast)
            .unwrap();
        assert_eq!(cursor.len(), 2);

        let snap = service.metrics(id).unwrap();
        assert_eq!(snap.entities_scanned, 3);
    }

    #[test]
    fn duplicate_scope_is_rejected_in_any_key_order() {
        let store = Arc::new(EntityStore::new());
        let label = store.tokens().label_token("Person");
        let a = store.tokens().property_token("a");
        let b = store.tokens().property_token("b");
        let service = IndexingService::with_defaults(Arc::clone(&store));

        service
            .create_index(IndexDescriptor::new(label, vec![a, b]))
            .unwrap();
        let err = service
            .create_index(IndexDescriptor::new(label, vec![b, a]))
            .unwrap_err();
        assert!(matches!(err, IndexError::ScopeAlreadyIndexed { .. }));
    }

    #[test]
    fn invalid_descriptors_never_register_anything() {
        let store = Arc::new(EntityStore::new());
        let label = store.tokens().label_token("Person");
        let service = IndexingService::with_defaults(Arc::clone(&store));

        let err = service
            .create_index(IndexDescriptor::new(label, vec![]))
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidDescriptor(_)));

        let mut unique = descriptor(&store);
        unique.unique = true;
        let err = service.create_index(unique).unwrap_err();
        assert!(matches!(err, IndexError::Unsupported(_)));

        assert_eq!(store.observer_count(), 0);
        assert!(service.list().is_empty());
    }

    #[test]
    fn unknown_index_reports_not_found() {
        let (store, _, _) = seeded_store(&[]);
        let service = IndexingService::with_defaults(store);
        let bogus = IndexId(42);

        assert!(matches!(
            service.state(bogus),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            service.await_online(bogus, Duration::from_millis(1)),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            service.metrics(bogus),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            service.drop_index(bogus),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn fail_fast_query_reports_not_online_while_populating() {
        let (store, _, _) = seeded_store(&["ada"]);
        let slow: Arc<dyn JobScheduler> = Arc::new(SlowScheduler::new(
            Arc::new(ThreadScheduler::new()),
            Duration::from_secs(2),
        ));
        let service =
            IndexingService::new(Arc::clone(&store), slow, PopulationConfig::default());

        let id = service.create_index(descriptor(&store)).unwrap();
        let err = service
            .exact_query(id, &ValueTuple::single("ada"), Readiness::FailFast)
            .unwrap_err();
        match err {
            IndexError::NotOnline { id: got, state } => {
                assert_eq!(got, id);
                assert!(!state.is_terminal());
            }
            other => panic!("expected NotOnline, got {other:?}"),
        }
        service.drop_index(id).unwrap();
    }

    #[test]
    fn writes_after_online_are_visible_immediately() {
        let (store, label, key) = seeded_store(&["ada"]);
        let service = IndexingService::with_defaults(Arc::clone(&store));
        let id = service.create_index(descriptor(&store)).unwrap();
        service.await_online(id, WAIT).unwrap();

        let e = store.create_entity(&[label]);
        store.set_property(e, key, "grace".into()).unwrap();
        let hits: Vec<EntityId> = service
            .exact_query(id, &ValueTuple::single("grace"), Readiness::FailFast)
            .unwrap()
            .collect();
        assert_eq!(hits, vec![e]);

        store.delete_entity(e).unwrap();
        let cursor = service
            .exact_query(id, &ValueTuple::single("grace"), Readiness::FailFast)
            .unwrap();
        assert_eq!(cursor.len(), 0);
    }

    #[test]
    fn drop_releases_the_subscription_and_frees_the_scope() {
        let (store, _, _) = seeded_store(&["ada"]);
        let service = IndexingService::with_defaults(Arc::clone(&store));

        let id = service.create_index(descriptor(&store)).unwrap();
        service.await_online(id, WAIT).unwrap();
        assert_eq!(store.observer_count(), 1);

        service.drop_index(id).unwrap();
        assert_eq!(store.observer_count(), 0);
        assert!(matches!(service.state(id), Err(IndexError::NotFound(_))));

        // Scope is reusable right away.
        let id2 = service.create_index(descriptor(&store)).unwrap();
        assert_ne!(id, id2);
        service.await_online(id2, WAIT).unwrap();
    }

    #[test]
    fn failed_population_surfaces_eagerly_and_drop_recovers() {
        let (store, _, _) = seeded_store(&["ada"]);
        let service = IndexingService::with_defaults(Arc::clone(&store));

        let id = service
            .create_index_with_scanner(descriptor(&store), Arc::new(FailingScanner))
            .unwrap();
        let err = service.await_online(id, WAIT).unwrap_err();
        match err {
            IndexError::PopulationFailed { reason, .. } => {
                assert!(reason.contains("synthetic scan failure"), "reason: {reason}");
            }
            other => panic!("expected PopulationFailed, got {other:?}"),
        }
        assert_eq!(service.state(id).unwrap(), PopulationState::Failed);

        // Failed is terminal for that index; recovery is drop and recreate.
        service.drop_index(id).unwrap();
        let id2 = service.create_index(descriptor(&store)).unwrap();
        service.await_online(id2, WAIT).unwrap();
        let cursor = service
            .exact_query(id2, &ValueTuple::single("ada"), Readiness::FailFast)
            .unwrap();
        assert_eq!(cursor.len(), 1);
    }

    #[test]
    fn await_all_online_covers_every_index() {
        let store = Arc::new(EntityStore::new());
        let person = store.tokens().label_token("Person");
        let order = store.tokens().label_token("Order");
        let key = store.tokens().property_token("name");
        let service = IndexingService::with_defaults(Arc::clone(&store));

        let a = service
            .create_index(IndexDescriptor::new(person, vec![key]))
            .unwrap();
        let b = service
            .create_index(IndexDescriptor::new(order, vec![key]))
            .unwrap();
        service.await_all_online(WAIT).unwrap();
        assert_eq!(service.state(a).unwrap(), PopulationState::Online);
        assert_eq!(service.state(b).unwrap(), PopulationState::Online);

        let listed = service.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, a);
        assert_eq!(listed[1].0, b);
    }

    #[test]
    fn await_readiness_blocks_queries_until_online() {
        let (store, _, _) = seeded_store(&["ada"]);
        let slow: Arc<dyn JobScheduler> = Arc::new(SlowScheduler::new(
            Arc::new(ThreadScheduler::new()),
            Duration::from_millis(100),
        ));
        let service =
            IndexingService::new(Arc::clone(&store), slow, PopulationConfig::default());

        let id = service.create_index(descriptor(&store)).unwrap();
        let cursor = service
            .exact_query(id, &ValueTuple::single("ada"), Readiness::Await(WAIT))
            .unwrap();
        assert_eq!(cursor.len(), 1);
    }

    #[test]
    fn shutdown_drops_everything() {
        let (store, _, _) = seeded_store(&["ada"]);
        let service = IndexingService::with_defaults(Arc::clone(&store));
        let id = service.create_index(descriptor(&store)).unwrap();
        service.await_online(id, WAIT).unwrap();

        service.shutdown();
        assert_eq!(store.observer_count(), 0);
        assert!(service.list().is_empty());
    }
}
