//! The population job: scan, interleaved drains, flip.
//!
//! One job per index, single-threaded by construction. The job owns the
//! suppression set: every entity seen in a drained delta is `touched`, and
//! stale scan output for a touched entity is discarded. Without this a late
//! scan row could resurrect an entity the capture stream already removed or
//! re-add an old value over a newer one.
//!
//! The job never blocks on producers. It drains whatever is queued between
//! scan batches, drains to quiescence after the scan, then seals the buffer.
//! The seal applies any deltas that slipped in since the last drain and
//! switches capture to direct mode in one critical section.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use harrier_common::config::PopulationConfig;
use harrier_common::error::IndexError;
use harrier_common::signal::StopSignal;
use harrier_common::types::{EntityId, IndexId, PopulationState};

use crate::accessor::IndexAccessor;
use crate::delta::{apply_kind, Delta, DeltaBuffer};
use crate::scan::IndexScanner;
use crate::state::{PopulationMetrics, StateCell};

pub(crate) struct IndexPopulator {
    id: IndexId,
    accessor: Arc<IndexAccessor>,
    buffer: Arc<DeltaBuffer>,
    cell: Arc<StateCell>,
    metrics: Arc<PopulationMetrics>,
    scanner: Arc<dyn IndexScanner>,
    stop: StopSignal,
    config: PopulationConfig,
}

impl IndexPopulator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: IndexId,
        accessor: Arc<IndexAccessor>,
        buffer: Arc<DeltaBuffer>,
        cell: Arc<StateCell>,
        metrics: Arc<PopulationMetrics>,
        scanner: Arc<dyn IndexScanner>,
        stop: StopSignal,
        config: PopulationConfig,
    ) -> Self {
        IndexPopulator {
            id,
            accessor,
            buffer,
            cell,
            metrics,
            scanner,
            stop,
            config,
        }
    }

    /// Job entry point. Terminal state transitions happen here; the caller
    /// only observes them through the state cell.
    pub(crate) fn run(&self) {
        if self.stop.is_stopped() || !self.cell.set_populating() {
            self.buffer.detach();
            tracing::debug!(index = %self.id, "population skipped");
            return;
        }
        tracing::info!(index = %self.id, "population started");
        match self.populate() {
            Ok(()) => {
                tracing::info!(
                    index = %self.id,
                    entries = self.accessor.entry_count(),
                    "index online"
                );
            }
            Err(IndexError::Cancelled) => {
                // Dropped, stopped, or failed from the capture side, which
                // already carries the reason. Nothing further to record.
                self.buffer.detach();
                tracing::debug!(index = %self.id, "population cancelled");
            }
            Err(e) => {
                self.buffer.detach();
                self.cell.fail(&e.to_string());
                tracing::warn!(index = %self.id, error = %e, "population failed");
            }
        }
    }

    fn populate(&self) -> Result<(), IndexError> {
        let scan_batch = self.config.scan_batch_size.max(1);
        let mut touched: HashSet<EntityId> = HashSet::new();
        let mut scratch: Vec<Delta> = Vec::new();
        let mut since_drain = 0usize;

        self.scanner.run(&mut |entity, tuple| {
            self.check_interrupt()?;
            self.metrics.entities_scanned.fetch_add(1, Ordering::Relaxed);
            if touched.contains(&entity) {
                // A captured delta already decided this entity's fate.
                self.metrics
                    .scan_adds_suppressed
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                self.accessor.add(entity, &tuple);
            }
            since_drain += 1;
            if since_drain >= scan_batch {
                since_drain = 0;
                self.drain_once(&mut touched, &mut scratch);
            }
            Ok(())
        })?;

        // Catch up with producers before flipping so the seal's critical
        // section only covers the last instants of the race.
        loop {
            self.check_interrupt()?;
            if self.drain_once(&mut touched, &mut scratch) == 0 {
                break;
            }
        }

        let flip_started = Instant::now();
        let residue = self.buffer.seal()?;
        self.metrics
            .flip_residue
            .fetch_add(residue as u64, Ordering::Relaxed);
        self.metrics.flip_micros.store(
            flip_started.elapsed().as_micros() as u64,
            Ordering::Relaxed,
        );

        if !self.cell.set_online() {
            return Err(IndexError::Cancelled);
        }
        tracing::debug!(index = %self.id, residue, "capture sealed");
        Ok(())
    }

    /// Apply at most one drain batch. Returns the number of deltas applied.
    fn drain_once(&self, touched: &mut HashSet<EntityId>, scratch: &mut Vec<Delta>) -> usize {
        scratch.clear();
        let max = self.config.drain_batch_size.max(1);
        let n = self.buffer.drain_batch(max, scratch);
        if n == 0 {
            return 0;
        }
        for delta in scratch.iter() {
            touched.insert(delta.entity);
            apply_kind(&self.accessor, delta.entity, &delta.kind);
        }
        self.metrics.deltas_drained.fetch_add(n as u64, Ordering::Relaxed);
        self.metrics.drain_batches.fetch_add(1, Ordering::Relaxed);
        n
    }

    fn check_interrupt(&self) -> Result<(), IndexError> {
        if self.stop.is_stopped()
            || self.cell.is_dropped()
            || self.cell.state() == PopulationState::Failed
        {
            return Err(IndexError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrier_common::value::ValueTuple;
    use harrier_store::events::{ChangeObserver, PropertyChange};

    /// Replays a fixed row list, invoking a hook after each row so tests can
    /// inject captured deltas at exact points in the scan.
    struct ScriptedScanner {
        rows: Vec<(EntityId, ValueTuple)>,
        after_row: Option<Box<dyn Fn(usize) + Send + Sync>>,
    }

    impl ScriptedScanner {
        fn rows(rows: Vec<(EntityId, ValueTuple)>) -> Self {
            ScriptedScanner {
                rows,
                after_row: None,
            }
        }
    }

    impl IndexScanner for ScriptedScanner {
        fn run(
            &self,
            sink: &mut dyn FnMut(EntityId, ValueTuple) -> Result<(), IndexError>,
        ) -> Result<(), IndexError> {
            for (i, (entity, tuple)) in self.rows.iter().enumerate() {
                sink(*entity, tuple.clone())?;
                if let Some(hook) = &self.after_row {
                    hook(i);
                }
            }
            Ok(())
        }
    }

    struct FailingScanner;

    impl IndexScanner for FailingScanner {
        fn run(
            &self,
            _sink: &mut dyn FnMut(EntityId, ValueTuple) -> Result<(), IndexError>,
        ) -> Result<(), IndexError> {
            Err(IndexError::ScanFailed {
                reason: "store scan aborted".into(),
            })
        }
    }

    struct Harness {
        populator: IndexPopulator,
        accessor: Arc<IndexAccessor>,
        buffer: Arc<DeltaBuffer>,
        cell: Arc<StateCell>,
        metrics: Arc<PopulationMetrics>,
        stop: StopSignal,
    }

    fn harness(scanner: Arc<dyn IndexScanner>, config: PopulationConfig) -> Harness {
        let accessor = Arc::new(IndexAccessor::new());
        let cell = Arc::new(StateCell::new());
        let metrics = Arc::new(PopulationMetrics::default());
        let buffer = Arc::new(DeltaBuffer::new(
            config.capture_capacity,
            Arc::clone(&accessor),
            Arc::clone(&cell),
            Arc::clone(&metrics),
        ));
        let stop = StopSignal::new();
        let populator = IndexPopulator::new(
            IndexId(1),
            Arc::clone(&accessor),
            Arc::clone(&buffer),
            Arc::clone(&cell),
            Arc::clone(&metrics),
            scanner,
            stop.clone(),
            config,
        );
        Harness {
            populator,
            accessor,
            buffer,
            cell,
            metrics,
            stop,
        }
    }

    fn row(id: u64, value: &str) -> (EntityId, ValueTuple) {
        (EntityId(id), ValueTuple::single(value))
    }

    fn added(buffer: &DeltaBuffer, id: u64, value: &str) {
        buffer.on_change(PropertyChange {
            entity: EntityId(id),
            before: None,
            after: Some(ValueTuple::single(value)),
        });
    }

    fn removed(buffer: &DeltaBuffer, id: u64, value: &str) {
        buffer.on_change(PropertyChange {
            entity: EntityId(id),
            before: Some(ValueTuple::single(value)),
            after: None,
        });
    }

    #[test]
    fn scan_only_population_goes_online() {
        let scanner = Arc::new(ScriptedScanner::rows(vec![
            row(1, "a"),
            row(2, "b"),
            row(3, "a"),
        ]));
        let h = harness(scanner, PopulationConfig::default());
        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Online);
        assert_eq!(h.accessor.entry_count(), 3);
        let mut hits = h.accessor.exact_lookup(&ValueTuple::single("a"));
        hits.sort();
        assert_eq!(hits, vec![EntityId(1), EntityId(3)]);
        assert_eq!(h.metrics.snapshot().entities_scanned, 3);
    }

    #[test]
    fn empty_scan_still_goes_online() {
        let h = harness(
            Arc::new(ScriptedScanner::rows(Vec::new())),
            PopulationConfig::default(),
        );
        h.populator.run();
        assert_eq!(h.cell.state(), PopulationState::Online);
        assert!(h.accessor.is_empty());
    }

    #[test]
    fn drained_remove_suppresses_stale_scan_add() {
        // The capture stream saw entity 2 appear and disappear before the
        // scan reached it; the scan still replays its old row.
        let scanner = Arc::new(ScriptedScanner::rows(vec![row(1, "a"), row(2, "b")]));
        let config = PopulationConfig {
            scan_batch_size: 1, // drain after every row
            ..PopulationConfig::default()
        };
        let h = harness(scanner, config);
        added(&h.buffer, 2, "b");
        removed(&h.buffer, 2, "b");

        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Online);
        assert_eq!(h.accessor.exact_lookup(&ValueTuple::single("a")), vec![EntityId(1)]);
        assert!(h.accessor.exact_lookup(&ValueTuple::single("b")).is_empty());
        let snap = h.metrics.snapshot();
        assert_eq!(snap.scan_adds_suppressed, 1);
        assert_eq!(snap.deltas_drained, 2);
    }

    #[test]
    fn drained_update_beats_stale_scan_value() {
        let scanner = Arc::new(ScriptedScanner::rows(vec![row(7, "old")]));
        let config = PopulationConfig {
            scan_batch_size: 1,
            ..PopulationConfig::default()
        };
        let h = harness(scanner, config);
        h.buffer.on_change(PropertyChange {
            entity: EntityId(7),
            before: Some(ValueTuple::single("old")),
            after: Some(ValueTuple::single("new")),
        });

        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Online);
        // The scan row lands first here (drains run after each row), and the
        // drained update then overwrites it via replace-on-add.
        assert!(h.accessor.exact_lookup(&ValueTuple::single("old")).is_empty());
        assert_eq!(h.accessor.exact_lookup(&ValueTuple::single("new")), vec![EntityId(7)]);
    }

    #[test]
    fn deltas_after_last_drain_are_applied_by_the_seal() {
        // Inject after the final row, past the last interleaved drain point.
        let buffer_slot: Arc<parking_lot::Mutex<Option<Arc<DeltaBuffer>>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&buffer_slot);
        let scanner = Arc::new(ScriptedScanner {
            rows: vec![row(1, "a")],
            after_row: Some(Box::new(move |_| {
                if let Some(buf) = slot.lock().as_ref() {
                    added(buf, 9, "z");
                }
            })),
        });
        let h = harness(scanner, PopulationConfig::default());
        *buffer_slot.lock() = Some(Arc::clone(&h.buffer));

        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Online);
        assert_eq!(h.accessor.exact_lookup(&ValueTuple::single("z")), vec![EntityId(9)]);
        // Drained by the post-scan catch-up loop or the seal; nothing lost.
        let snap = h.metrics.snapshot();
        assert_eq!(snap.deltas_drained + snap.flip_residue, 1);
    }

    #[test]
    fn scan_failure_marks_population_failed() {
        let h = harness(Arc::new(FailingScanner), PopulationConfig::default());
        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Failed);
        let reason = h.cell.failure_reason().unwrap();
        assert!(reason.contains("store scan aborted"), "reason: {reason}");
        assert!(h.accessor.is_empty());
    }

    #[test]
    fn capture_overflow_aborts_the_scan() {
        let buffer_slot: Arc<parking_lot::Mutex<Option<Arc<DeltaBuffer>>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&buffer_slot);
        let scanner = Arc::new(ScriptedScanner {
            rows: vec![row(1, "a"), row(2, "b"), row(3, "c")],
            after_row: Some(Box::new(move |i| {
                if i == 0 {
                    if let Some(buf) = slot.lock().as_ref() {
                        added(buf, 10, "x");
                        added(buf, 11, "x"); // second offer overflows
                    }
                }
            })),
        });
        let config = PopulationConfig {
            capture_capacity: 1,
            scan_batch_size: 1024, // no interleaved drain before the overflow
            ..PopulationConfig::default()
        };
        let h = harness(scanner, config);
        *buffer_slot.lock() = Some(Arc::clone(&h.buffer));

        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Failed);
        assert!(h.cell.failure_reason().unwrap().contains("overflow"));
        // The scan stopped at the next row; only the first landed.
        assert!(h.metrics.snapshot().entities_scanned < 3);
    }

    #[test]
    fn stop_before_start_leaves_the_index_offline() {
        let scanner = Arc::new(ScriptedScanner::rows(vec![row(1, "a")]));
        let h = harness(scanner, PopulationConfig::default());
        h.stop.stop();

        h.populator.run();

        assert_ne!(h.cell.state(), PopulationState::Online);
        assert!(h.accessor.is_empty());
        assert_eq!(h.metrics.snapshot().entities_scanned, 0);
    }

    #[test]
    fn stop_during_scan_cancels_without_failing() {
        let stop_slot: Arc<parking_lot::Mutex<Option<StopSignal>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&stop_slot);
        let scanner = Arc::new(ScriptedScanner {
            rows: vec![row(1, "a"), row(2, "b"), row(3, "c")],
            after_row: Some(Box::new(move |i| {
                if i == 0 {
                    if let Some(stop) = slot.lock().as_ref() {
                        stop.stop();
                    }
                }
            })),
        });
        let h = harness(scanner, PopulationConfig::default());
        *stop_slot.lock() = Some(h.stop.clone());

        h.populator.run();

        assert_eq!(h.cell.state(), PopulationState::Populating);
        assert!(!h.cell.state().is_terminal());
        assert!(h.metrics.snapshot().entities_scanned < 3);
    }
}
