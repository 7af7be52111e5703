//! Population state cell and progress metrics.
//!
//! The cell is the one place the lifecycle state lives. The populator drives
//! transitions; awaiters block on the condvar and are woken by every
//! terminal transition, so failure propagates eagerly instead of being
//! discovered on the next poll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use harrier_common::error::IndexError;
use harrier_common::types::{IndexId, PopulationState};

struct CellInner {
    state: PopulationState,
    /// First failure reason; later failures do not overwrite it.
    failure: Option<String>,
    /// Set when the index is dropped. Orthogonal to `state` so a dropped
    /// index keeps reporting `NotFound` rather than a stale state.
    dropped: bool,
}

/// Shared lifecycle state with condvar-based waiting.
pub(crate) struct StateCell {
    inner: Mutex<CellInner>,
    cond: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell {
            inner: Mutex::new(CellInner {
                state: PopulationState::Creating,
                failure: None,
                dropped: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> PopulationState {
        self.inner.lock().state
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.inner.lock().dropped
    }

    pub(crate) fn failure_reason(&self) -> Option<String> {
        self.inner.lock().failure.clone()
    }

    /// Creating to Populating. False if the population should not start
    /// (already failed, or dropped before the job ran).
    pub(crate) fn set_populating(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.dropped || inner.state != PopulationState::Creating {
            return false;
        }
        inner.state = PopulationState::Populating;
        true
    }

    /// Populating to Online. Only a clean flip gets here; false means the
    /// population lost a race with fail or drop and must not publish.
    pub(crate) fn set_online(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.dropped || inner.state != PopulationState::Populating {
            return false;
        }
        inner.state = PopulationState::Online;
        self.cond.notify_all();
        true
    }

    /// Transition to Failed from any non-terminal state, waking all
    /// awaiters. Returns false if already terminal (the first reason wins).
    pub(crate) fn fail(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = PopulationState::Failed;
        inner.failure = Some(reason.to_string());
        self.cond.notify_all();
        true
    }

    /// Mark the index dropped and wake all awaiters; they observe NotFound.
    pub(crate) fn mark_dropped(&self) {
        let mut inner = self.inner.lock();
        inner.dropped = true;
        self.cond.notify_all();
    }

    /// Block until the state is Online, the population fails, the index is
    /// dropped, or `timeout` elapses.
    pub(crate) fn await_online(&self, id: IndexId, timeout: Duration) -> Result<(), IndexError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.dropped {
                return Err(IndexError::NotFound(id));
            }
            match inner.state {
                PopulationState::Online => return Ok(()),
                PopulationState::Failed => {
                    return Err(IndexError::PopulationFailed {
                        id,
                        reason: inner
                            .failure
                            .clone()
                            .unwrap_or_else(|| "unknown failure".to_string()),
                    });
                }
                PopulationState::Creating | PopulationState::Populating => {}
            }
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return Err(IndexError::AwaitTimeout {
                    id,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }
}

/// Per-population counters, updated with relaxed atomics.
#[derive(Default)]
pub(crate) struct PopulationMetrics {
    pub entities_scanned: AtomicU64,
    pub scan_adds_suppressed: AtomicU64,
    pub deltas_buffered: AtomicU64,
    pub deltas_drained: AtomicU64,
    pub deltas_applied_direct: AtomicU64,
    pub drain_batches: AtomicU64,
    pub flip_residue: AtomicU64,
    pub flip_micros: AtomicU64,
}

impl PopulationMetrics {
    pub(crate) fn snapshot(&self) -> PopulationMetricsSnapshot {
        PopulationMetricsSnapshot {
            entities_scanned: self.entities_scanned.load(Ordering::Relaxed),
            scan_adds_suppressed: self.scan_adds_suppressed.load(Ordering::Relaxed),
            deltas_buffered: self.deltas_buffered.load(Ordering::Relaxed),
            deltas_drained: self.deltas_drained.load(Ordering::Relaxed),
            deltas_applied_direct: self.deltas_applied_direct.load(Ordering::Relaxed),
            drain_batches: self.drain_batches.load(Ordering::Relaxed),
            flip_residue: self.flip_residue.load(Ordering::Relaxed),
            flip_micros: self.flip_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a population's progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PopulationMetricsSnapshot {
    /// Entries the scanner produced.
    pub entities_scanned: u64,
    /// Scan entries skipped because a delta had already touched the entity.
    pub scan_adds_suppressed: u64,
    /// Deltas admitted to the buffer.
    pub deltas_buffered: u64,
    /// Deltas drained and applied by the populator.
    pub deltas_drained: u64,
    /// Mutations applied directly after the flip.
    pub deltas_applied_direct: u64,
    /// Drain cycles that applied at least one delta.
    pub drain_batches: u64,
    /// Deltas applied inside the flip critical section.
    pub flip_residue: u64,
    /// Wall time of the flip critical section.
    pub flip_micros: u64,
}
